//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → loader.rs (strict deserialize, unknown fields rejected)
//!     → Config (immutable, shared via Arc)
//!     → watcher.rs republishes on file modification
//!     → proxy reconciles listeners/backends/routes against each revision
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a full reload
//! - A failed reload logs and keeps the previous configuration
//! - Policy expansion happens at reconcile time, not load time

pub mod loader;
pub mod schema;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{Config, Target, DEFAULT_MAX_IDLE};
