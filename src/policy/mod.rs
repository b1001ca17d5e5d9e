//! Per-source-address authorization over parsed MDC commands.
//!
//! # Responsibilities
//! - Decide whether a policy permits a command (`read` vs `write`,
//!   documented vs undocumented Q commands, writable variable ranges)
//! - Order policy entries by priority and prefix for first-match lookup

pub mod prefix;

pub use prefix::{Prefix, PrefixError};

use std::net::IpAddr;
use std::sync::Arc;

use serde::Deserialize;

use crate::message::Command;

/// Access policy applied to commands from a matched source prefix.
///
/// The zero-value policy denies everything except safe commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Allow Q commands that are not present in the Haas Mill Operator's
    /// Manual to be proxied.
    pub allow_undocumented_q: bool,

    /// Inclusive pairs of macro variable numbers that may be written to.
    pub allow_writes: Vec<[i64; 2]>,

    /// Emit an audit log line for each proxied message.
    pub audit: bool,
}

impl Policy {
    /// Returns true if the command is permitted by the policy.
    pub fn allow(&self, command: &Command) -> bool {
        if command.is_safe() {
            return true;
        }
        if command.is_write() {
            return command
                .variable()
                .is_some_and(|v| self.allow_write(v.whole()));
        }
        if command.command().is_some() && self.allow_undocumented_q {
            return true;
        }
        false
    }

    /// Returns true if writes to the given variable number are permitted.
    pub fn allow_write(&self, variable: i64) -> bool {
        self.allow_writes
            .iter()
            .any(|&[lo, hi]| lo <= variable && variable <= hi)
    }
}

/// A policy entry bound to a source prefix and an evaluation priority.
#[derive(Debug, Clone)]
pub struct OrderedPolicy {
    pub prefix: Prefix,
    pub priority: i32,
    pub policy: Arc<Policy>,
}

/// Sort entries by priority (higher first), then prefix length, then
/// network address.
///
/// Lookup returns the first match, so per-target entries (priority 1) are
/// consulted before the global ones, and within a priority band a shorter,
/// broader prefix is consulted before a longer one.
pub fn sort_ordered(entries: &mut [OrderedPolicy]) {
    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.prefix.bits().cmp(&b.prefix.bits()))
            .then_with(|| a.prefix.addr_octets().cmp(&b.prefix.addr_octets()))
    });
}

/// Return the first entry whose prefix contains the source address.
///
/// IPv4-mapped IPv6 addresses are canonicalized so that a client arriving
/// over a dual-stack socket still matches its IPv4 prefix.
pub fn match_policy(entries: &[OrderedPolicy], source: IpAddr) -> Option<&OrderedPolicy> {
    let source = source.to_canonical();
    entries.iter().find(|entry| entry.prefix.contains(source))
}
