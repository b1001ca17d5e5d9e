//! Connections to backend MDC hosts.

pub mod connection;

pub use connection::{BackendConnection, BackendError, ROUND_TRIP_TIMEOUT};
