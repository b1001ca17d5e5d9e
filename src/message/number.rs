//! Fixed-point decimal values for the MDC wire protocol.
//!
//! Macro variables on the control are decimal registers; the wire format
//! writes them as `<whole>.<frac>` with the fractional digits preserved
//! exactly as sent. Binary floating point cannot represent that faithfully
//! (`1.10` and `1.1` are distinct wire values), so values are kept as a pair
//! of integers plus a NaN flag.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::message::ParseError;

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<whole>[+-]?\d+)(?:\.(?P<frac>\d*))?$").expect("invalid number pattern")
});

/// A fixed-point decimal value.
///
/// The fractional part is the decimal integer of the digits after the point,
/// so leading zeros are significant in neither direction: `1.10` parses to
/// `frac == 10` and formats back as `1.10`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Number {
    whole: i64,
    frac: i64,
    nan: bool,
}

impl Number {
    /// The not-a-number sentinel. Unlike IEEE NaN, it compares equal to
    /// itself; the control uses it as an "unset" marker.
    pub const NAN: Number = Number {
        whole: 0,
        frac: 0,
        nan: true,
    };

    /// Construct a number with a whole and fractional part.
    ///
    /// # Panics
    ///
    /// Panics if `frac` is negative.
    pub fn new(whole: i64, frac: i64) -> Self {
        assert!(frac >= 0, "frac must be non-negative");
        Self {
            whole,
            frac,
            nan: false,
        }
    }

    /// Construct an integer-valued number.
    pub const fn int(whole: i64) -> Self {
        Self {
            whole,
            frac: 0,
            nan: false,
        }
    }

    /// The whole portion of the number.
    pub fn whole(&self) -> i64 {
        self.whole
    }

    /// The fractional portion of the number, as the decimal integer of the
    /// digits after the point.
    pub fn frac(&self) -> i64 {
        self.frac
    }

    /// True if the value is the NaN sentinel.
    pub fn is_nan(&self) -> bool {
        self.nan
    }
}

/// Parse a numeric token.
///
/// Surrounding whitespace is ignored and the literal `NaN` is accepted.
pub fn parse_number(buf: &[u8]) -> Result<Number, ParseError> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| ParseError::InvalidNumber)?
        .trim();

    if text.is_empty() {
        return Err(ParseError::EmptyNumber);
    }
    if text == "NaN" {
        return Ok(Number::NAN);
    }

    let caps = NUMBER_PATTERN
        .captures(text)
        .ok_or(ParseError::InvalidNumber)?;
    let whole = caps["whole"]
        .parse::<i64>()
        .map_err(|_| ParseError::NumberRange)?;
    let frac = match caps.name("frac") {
        Some(digits) if !digits.as_str().is_empty() => digits
            .as_str()
            .parse::<i64>()
            .map_err(|_| ParseError::NumberRange)?,
        _ => 0,
    };

    Ok(Number::new(whole, frac))
}

impl fmt::Display for Number {
    /// Formats as `<whole>.<frac>`, or as `<whole>` alone when formatted
    /// with zero precision (`{:.0}`). NaN always formats as `NaN`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nan {
            return f.write_str("NaN");
        }
        match f.precision() {
            Some(0) => write!(f, "{}", self.whole),
            _ => write!(f, "{}.{}", self.whole, self.frac),
        }
    }
}
