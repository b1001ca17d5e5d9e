//! Parsed MDC client requests.
//!
//! # Responsibilities
//! - Parse `?Q` and `?E` wire messages into [`Command`] values
//! - Maintain the canonical table of interned basic commands
//! - Re-serialize commands into their canonical wire form
//! - Decode server replies according to the command that produced them

use std::fmt;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;

use crate::message::number::{parse_number, Number};
use crate::message::response::Response;
use crate::message::ParseError;

/// The macro-variable command number; `?Q600 n` reads macro variable `n`.
pub const Q_MACRO_VARIABLE: Number = Number::int(600);

/// Basic Q command numbers documented in the Haas Mill Operator's Manual.
pub const DOCUMENTED_CODES: [Number; 13] = [
    Number::int(100), // machine serial number
    Number::int(101), // control software version
    Number::int(102), // machine model
    Number::int(104), // mode
    Number::int(200), // tool changes
    Number::int(201), // tool number in use
    Number::int(300), // power-on time
    Number::int(301), // motion time
    Number::int(303), // last cycle time
    Number::int(304), // previous cycle time
    Number::int(402), // M30 parts counter 1
    Number::int(403), // M30 parts counter 2
    Number::int(500), // three-in-one
];

static QUERY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<command>\d+)(?:\s+(?P<variable>\d+(?:\.\d*)?)?)?\s*$")
        .expect("invalid query pattern")
});

static WRITE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<variable>\d+)\s+(?P<value>[+-]?\d+(?:\.\d*)?)\s*$")
        .expect("invalid write pattern")
});

// Canonical instances of basic commands, so equality can be tested by
// identity and the documented flag is computed once per code. Seeded with
// permanently-held entries for the documented set; capped so a flood of
// unknown codes cannot grow the table without bound.
static CANONICAL_BASIC: LazyLock<DashMap<Number, Arc<BasicCommand>>> = LazyLock::new(|| {
    let map = DashMap::new();
    for code in DOCUMENTED_CODES {
        map.insert(
            code,
            Arc::new(BasicCommand {
                code,
                documented: true,
            }),
        );
    }
    map
});

const CANONICAL_LIMIT: usize = 1024;

/// A basic Q command with no parameters.
///
/// Instances are canonicalized through [`Command::basic`]; two basic
/// commands with the same code share one allocation.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicCommand {
    code: Number,
    documented: bool,
}

impl BasicCommand {
    /// The Q command number.
    pub fn code(&self) -> Number {
        self.code
    }

    /// True if the command appears in official Haas documentation.
    pub fn is_documented(&self) -> bool {
        self.documented
    }
}

/// A parsed MDC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A parameterless Q command, e.g. `?Q102`.
    Basic(Arc<BasicCommand>),
    /// A macro-variable read, `?Q600 <variable>`.
    Query { variable: Number },
    /// A macro-variable write, `?E<variable> <value>`.
    Write { variable: Number, value: Number },
}

impl Command {
    /// Return the canonical basic command for the given code.
    pub fn basic(code: Number) -> Command {
        if let Some(found) = CANONICAL_BASIC.get(&code) {
            return Command::Basic(Arc::clone(&found));
        }
        let fresh = Arc::new(BasicCommand {
            code,
            documented: false,
        });
        if CANONICAL_BASIC.len() >= CANONICAL_LIMIT {
            return Command::Basic(fresh);
        }
        Command::Basic(Arc::clone(&CANONICAL_BASIC.entry(code).or_insert(fresh)))
    }

    /// A macro-variable read.
    pub fn query(variable: Number) -> Command {
        Command::Query { variable }
    }

    /// A macro-variable write.
    pub fn write(variable: Number, value: Number) -> Command {
        Command::Write { variable, value }
    }

    /// The machine serial number command, issued as a handshake when a
    /// backend connection is established.
    pub fn machine_sn() -> Command {
        Command::basic(Number::int(100))
    }

    /// The Q command number associated with the message. Macro-variable
    /// reads and writes both report 600.
    pub fn command(&self) -> Option<Number> {
        match self {
            Command::Basic(basic) => Some(basic.code),
            Command::Query { .. } | Command::Write { .. } => Some(Q_MACRO_VARIABLE),
        }
    }

    /// True if the message is unlikely to cause damage to the MDC receiver.
    pub fn is_safe(&self) -> bool {
        match self {
            Command::Basic(basic) => basic.documented || basic.code == Q_MACRO_VARIABLE,
            Command::Query { variable } => variable.whole() >= 0 && variable.frac() == 0,
            Command::Write { .. } => false,
        }
    }

    /// True if the message writes to a remote variable.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Write { .. })
    }

    /// The macro variable number associated with the message, if any.
    pub fn variable(&self) -> Option<Number> {
        match self {
            Command::Query { variable } | Command::Write { variable, .. } => Some(*variable),
            Command::Basic(_) => None,
        }
    }

    /// The macro variable value associated with the message, if any.
    pub fn value(&self) -> Option<Number> {
        match self {
            Command::Write { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The canonical wire form of the command, newline terminated.
    pub fn canonical(&self) -> String {
        format!("{self}\n")
    }

    /// Interpret a reply payload in terms of this command.
    pub fn parse_response(&self, buf: &[u8]) -> Response {
        match self {
            Command::Write { .. } => Response::opaque(buf, buf == b"!"),
            Command::Query { .. } => {
                if let Some((_, value)) = split_reply(buf) {
                    if let Ok(value) = parse_number(value) {
                        return Response::query(value);
                    }
                }
                Response::opaque(buf, false)
            }
            Command::Basic(_) => Response::opaque(buf, false),
        }
    }
}

/// Split a reply of the form `LABEL, <value>`. Replies with more or fewer
/// than two comma-separated fields are not splittable.
fn split_reply(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    const SEP: &[u8] = b", ";
    let at = buf.windows(SEP.len()).position(|window| window == SEP)?;
    let tail = &buf[at + SEP.len()..];
    if tail.windows(SEP.len()).any(|window| window == SEP) {
        return None;
    }
    Some((&buf[..at], tail))
}

/// Interpret the input as a [`Command`].
pub fn parse_command(buf: &[u8]) -> Result<Command, ParseError> {
    if buf.len() < 3 {
        return Err(ParseError::Undersized);
    }
    if buf[0] != b'?' {
        return Err(ParseError::MissingPrefix);
    }
    match buf[1] {
        b'Q' => {
            let rest = std::str::from_utf8(&buf[2..]).map_err(|_| ParseError::QueryGrammar)?;
            let caps = QUERY_PATTERN.captures(rest).ok_or(ParseError::QueryGrammar)?;
            let code = parse_number(caps["command"].as_bytes())?;
            if code.frac() != 0 {
                return Err(ParseError::FractionalCommand);
            }
            if code == Q_MACRO_VARIABLE {
                let variable = caps.name("variable").ok_or(ParseError::MissingVariable)?;
                let variable = parse_number(variable.as_str().as_bytes())?;
                return Ok(Command::query(variable));
            }
            Ok(Command::basic(code))
        }
        b'E' => {
            let rest = std::str::from_utf8(&buf[2..]).map_err(|_| ParseError::WriteGrammar)?;
            let caps = WRITE_PATTERN.captures(rest).ok_or(ParseError::WriteGrammar)?;
            let variable = parse_number(caps["variable"].as_bytes())?;
            let value = parse_number(caps["value"].as_bytes())?;
            Ok(Command::write(variable, value))
        }
        other => Err(ParseError::InvalidVariant(other as char)),
    }
}

impl fmt::Display for Command {
    /// The canonical wire form without the trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Basic(basic) => write!(f, "?Q{:.0}", basic.code),
            Command::Query { variable } => write!(f, "?Q600 {variable}"),
            Command::Write { variable, value } => write!(f, "?E{variable:.0} {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorations() {
        struct Case {
            command: Command,
            safe: bool,
            write: bool,
            variable: bool,
            value: bool,
        }
        let cases = [
            Case {
                command: Command::machine_sn(),
                safe: true,
                write: false,
                variable: false,
                value: false,
            },
            // Not safe because it is undocumented.
            Case {
                command: Command::basic(Number::int(999)),
                safe: false,
                write: false,
                variable: false,
                value: false,
            },
            Case {
                command: Command::query(Number::int(999)),
                safe: true,
                write: false,
                variable: true,
                value: false,
            },
            // Not safe because of the fractional variable number.
            Case {
                command: Command::query(Number::new(999, 999)),
                safe: false,
                write: false,
                variable: true,
                value: false,
            },
            Case {
                command: Command::write(Number::int(99), Number::int(101)),
                safe: false,
                write: true,
                variable: true,
                value: true,
            },
        ];
        for case in cases {
            assert!(case.command.command().is_some());
            assert_eq!(case.command.is_safe(), case.safe, "{}", case.command);
            assert_eq!(case.command.is_write(), case.write, "{}", case.command);
            assert_eq!(
                case.command.variable().is_some(),
                case.variable,
                "{}",
                case.command
            );
            assert_eq!(case.command.value().is_some(), case.value, "{}", case.command);
        }
    }

    #[test]
    fn test_query_zero_variable_is_safe() {
        assert!(Command::query(Number::int(0)).is_safe());
        assert!(!Command::query(Number::int(-1)).is_safe());
    }

    #[test]
    fn test_basic_canonical_identity() {
        let (Command::Basic(a), Command::Basic(b)) =
            (Command::machine_sn(), Command::basic(Number::int(100)))
        else {
            panic!("expected basic commands");
        };
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_documented());

        let (Command::Basic(a), Command::Basic(b)) = (
            Command::basic(Number::int(999)),
            Command::basic(Number::int(999)),
        ) else {
            panic!("expected basic commands");
        };
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_documented());
    }

    #[test]
    fn test_documented_set() {
        for code in DOCUMENTED_CODES {
            assert!(Command::basic(code).is_safe(), "?Q{code:.0}");
        }
        // Basic 600 is safe without being in the documented set.
        assert!(Command::basic(Q_MACRO_VARIABLE).is_safe());
    }

    #[test]
    fn test_parse_command() {
        // (input, expected, canonical form when it differs from the input)
        let cases: &[(&str, Command, &str)] = &[
            ("?Q100", Command::basic(Number::int(100)), ""),
            ("?Q100  ", Command::basic(Number::int(100)), "?Q100"),
            ("?Q600 1234", Command::query(Number::int(1234)), "?Q600 1234.0"),
            ("?Q600 1234 ", Command::query(Number::int(1234)), "?Q600 1234.0"),
            ("?Q600 1234.", Command::query(Number::int(1234)), "?Q600 1234.0"),
            (
                "?Q600 1234.567",
                Command::query(Number::new(1234, 567)),
                "",
            ),
            (
                "?E12 567",
                Command::write(Number::int(12), Number::int(567)),
                "?E12 567.0",
            ),
            (
                "?E12 -567",
                Command::write(Number::int(12), Number::int(-567)),
                "?E12 -567.0",
            ),
            (
                "?E12 +567",
                Command::write(Number::int(12), Number::int(567)),
                "?E12 567.0",
            ),
            (
                "?E12 567.",
                Command::write(Number::int(12), Number::int(567)),
                "?E12 567.0",
            ),
        ];
        for (input, expected, canonical) in cases {
            let parsed = parse_command(input.as_bytes()).unwrap();
            assert_eq!(parsed, *expected, "input {input:?}");

            // The canonical form must reparse to the same command.
            let reparsed = parse_command(parsed.canonical().trim_end().as_bytes()).unwrap();
            assert_eq!(parsed, reparsed, "input {input:?}");

            let expected_canonical = if canonical.is_empty() { input } else { canonical };
            assert_eq!(
                parsed.canonical(),
                format!("{expected_canonical}\n"),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_command_errors() {
        let cases: &[(&str, ParseError)] = &[
            ("", ParseError::Undersized),
            ("?Q", ParseError::Undersized),
            ("Q100", ParseError::MissingPrefix),
            ("?U1", ParseError::InvalidVariant('U')),
            ("?Q100.1", ParseError::FractionalCommand),
            ("?Q600 ", ParseError::MissingVariable),
            ("?Q600 XYZ", ParseError::QueryGrammar),
            ("?E1", ParseError::WriteGrammar),
            ("?E1X", ParseError::WriteGrammar),
            ("?E1 Y", ParseError::WriteGrammar),
            ("?E12.34 567.8", ParseError::WriteGrammar),
        ];
        for (input, expected) in cases {
            let err = parse_command(input.as_bytes()).unwrap_err();
            assert_eq!(err, *expected, "input {input:?}");
        }
    }

    #[test]
    fn test_parse_response() {
        let query = Command::query(Number::int(1234));
        assert_eq!(
            query.parse_response(b"MACRO, 123.456"),
            Response::query(Number::new(123, 456))
        );
        assert_eq!(
            query.parse_response(b"MACRO, NaN"),
            Response::query(Number::NAN)
        );
        assert_eq!(query.parse_response(b""), Response::opaque(b"", false));
        assert_eq!(
            query.parse_response(b"MACRO, ?, Q600-1"),
            Response::opaque(b"MACRO, ?, Q600-1", false)
        );

        let write = Command::write(Number::int(1), Number::int(2));
        assert_eq!(write.parse_response(b"!"), Response::opaque(b"!", true));
        assert_eq!(write.parse_response(b"?"), Response::opaque(b"?", false));

        let basic = Command::machine_sn();
        assert_eq!(
            basic.parse_response(b"SERIAL NUMBER, 1024"),
            Response::opaque(b"SERIAL NUMBER, 1024", false)
        );
    }
}
