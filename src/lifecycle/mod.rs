//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → cancel the process-wide token
//!
//! Shutdown:
//!     token cancelled → listeners close → accept loops exit →
//!     client loops observe cancellation on their next tick and drain
//! ```
//!
//! Every long-running task in the proxy is driven by one cooperative
//! [`tokio_util::sync::CancellationToken`]; this module is the only place
//! that connects OS signals to it.

pub mod signals;
