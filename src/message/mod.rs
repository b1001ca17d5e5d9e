//! The Machine Data Collection wire protocol, as described in the Haas Mill
//! Operator's Manual.
//!
//! # Responsibilities
//! - Fixed-point [`Number`] values with a NaN sentinel
//! - [`Command`] parsing, canonical re-serialization, and interning of
//!   basic commands
//! - [`Response`] classification per originating command
//! - Prompt-framed line scanning and writing

pub mod command;
pub mod number;
pub mod response;
pub mod wire;

pub use command::{parse_command, BasicCommand, Command, DOCUMENTED_CODES, Q_MACRO_VARIABLE};
pub use number::{parse_number, Number};
pub use response::Response;

use thiserror::Error;

/// A client message that could not be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty number")]
    EmptyNumber,

    #[error("invalid number format")]
    InvalidNumber,

    #[error("number out of range")]
    NumberRange,

    #[error("undersized message")]
    Undersized,

    #[error("invalid message: no leading '?'")]
    MissingPrefix,

    #[error("invalid message: invalid character {0:?}")]
    InvalidVariant(char),

    #[error("invalid query: expecting a whole number and an optional variable")]
    QueryGrammar,

    #[error("invalid query: not expecting a fractional Q command")]
    FractionalCommand,

    #[error("a Q600 command must specify a variable")]
    MissingVariable,

    #[error("invalid write: expecting a variable number and a numeric argument")]
    WriteGrammar,
}
