//! Replies from an MDC host.

use std::fmt;

use crate::message::number::Number;

/// A reply to an MDC command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A successful macro-variable read; wire form `MACRO, <value>`.
    Query { value: Number },
    /// Any other reply, carried verbatim. `success` is true only for the
    /// write acknowledgement `!`.
    Opaque { buffer: Vec<u8>, success: bool },
}

impl Response {
    /// A successful macro-variable read.
    pub fn query(value: Number) -> Response {
        Response::Query { value }
    }

    /// An arbitrary reply. The response owns a private copy of the bytes.
    pub fn opaque(buffer: &[u8], success: bool) -> Response {
        Response::Opaque {
            buffer: buffer.to_vec(),
            success,
        }
    }

    /// The macro variable value, if the reply carried one.
    pub fn value(&self) -> Option<Number> {
        match self {
            Response::Query { value } => Some(*value),
            Response::Opaque { .. } => None,
        }
    }

    /// Otherwise-unparsed reply data, if any.
    pub fn buffer(&self) -> Option<&[u8]> {
        match self {
            Response::Opaque { buffer, .. } => Some(buffer),
            Response::Query { .. } => None,
        }
    }

    /// True if the request was successful.
    pub fn is_success(&self) -> bool {
        match self {
            Response::Query { .. } => true,
            Response::Opaque { success, .. } => *success,
        }
    }

    /// The canonical wire form of the reply, without a line terminator.
    pub fn wire_bytes(&self) -> Vec<u8> {
        match self {
            Response::Query { value } => format!("MACRO, {value}").into_bytes(),
            Response::Opaque { buffer, .. } => buffer.clone(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Query { value } => write!(f, "MACRO, {value}"),
            Response::Opaque { buffer, .. } => {
                write!(f, "{}", String::from_utf8_lossy(buffer))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bytes() {
        assert_eq!(
            Response::query(Number::new(3, 141592)).wire_bytes(),
            b"MACRO, 3.141592"
        );
        assert_eq!(Response::query(Number::NAN).wire_bytes(), b"MACRO, NaN");
        assert_eq!(Response::opaque(b"!", true).wire_bytes(), b"!");
    }

    #[test]
    fn test_success() {
        assert!(Response::query(Number::int(1)).is_success());
        assert!(Response::opaque(b"!", true).is_success());
        assert!(!Response::opaque(b"?, NOPE", false).is_success());
    }
}
