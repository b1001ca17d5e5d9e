//! A policy-enforcing TCP reverse proxy for the Machine Data Collection
//! wire protocol spoken by Haas Next Generation Controls.
//!
//! An MDC host normally permits only two concurrent clients and broadcasts
//! replies to all of them. The proxy fans out any number of clients onto a
//! single serialized connection per backend host, and enforces a
//! per-source-address policy over the command set.
//!
//! ```text
//!                        ┌──────────────────────────────────────────┐
//!                        │                  PROXY                   │
//!   Client ──?Q102──────▶│ listener ─▶ message ─▶ policy ─▶ backend │──▶ MDC host
//!   Client ◀─MODEL, …────│   per-client loop      engine     conn   │◀── (one socket,
//!                        │                                          │     serialized)
//!                        │   config file ─▶ watcher ─▶ reconcile    │
//!                        └──────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod dummy;
pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod policy;
pub mod proxy;

pub use config::Config;
pub use proxy::Proxy;
