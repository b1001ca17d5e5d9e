//! Configuration schema definitions.
//!
//! The proxy consumes a JSON document mapping backend hosts to proxy ports
//! and source prefixes to access policies. Unknown fields are rejected so a
//! typo cannot silently widen access.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::policy::{self, OrderedPolicy, Policy, Prefix};

/// Idle clients are disconnected after this long when the configuration
/// leaves `max_idle` unset.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Local address that proxy listeners bind to.
    pub bind: IpAddr,

    /// Maximum client idle time, e.g. `"5m"`. Zero or absent selects
    /// [`DEFAULT_MAX_IDLE`].
    #[serde(default, deserialize_with = "duration::deserialize")]
    pub max_idle: Duration,

    /// Access policies applied to every target.
    #[serde(default)]
    pub policy: HashMap<Prefix, Policy>,

    /// Backend MDC hosts, keyed by `host:port`.
    #[serde(default)]
    pub targets: HashMap<String, Target>,
}

/// A single backend MDC host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    /// Local port the proxy listens on for this target.
    pub proxy_port: u16,

    /// Per-target policy overrides; these match ahead of the global ones.
    #[serde(default)]
    pub policy: HashMap<Prefix, Policy>,

    /// Evaluation-ordered policy list, filled by [`Config::expand_policy`].
    #[serde(skip)]
    pub ordered: Vec<OrderedPolicy>,
}

impl Config {
    /// The client idle limit with the default applied.
    pub fn effective_max_idle(&self) -> Duration {
        if self.max_idle.is_zero() {
            DEFAULT_MAX_IDLE
        } else {
            self.max_idle
        }
    }

    /// Expand the policy maps into each target's evaluation-ordered list.
    ///
    /// Global entries carry priority 0 and per-target entries priority 1. A
    /// target with no entries at all falls back to a loopback-only policy
    /// that denies everything except safe commands.
    pub fn expand_policy(&mut self) {
        if self.max_idle.is_zero() {
            self.max_idle = DEFAULT_MAX_IDLE;
        }
        for (hostname, target) in &mut self.targets {
            let mut ordered = Vec::with_capacity(self.policy.len() + target.policy.len());
            for (prefix, entry) in &self.policy {
                ordered.push(OrderedPolicy {
                    prefix: *prefix,
                    priority: 0,
                    policy: Arc::new(entry.clone()),
                });
            }
            for (prefix, entry) in &target.policy {
                ordered.push(OrderedPolicy {
                    prefix: *prefix,
                    priority: 1,
                    policy: Arc::new(entry.clone()),
                });
            }
            if ordered.is_empty() {
                tracing::warn!(hostname = %hostname, "using default localhost policy");
                let deny_all = Arc::new(Policy::default());
                ordered = vec![
                    OrderedPolicy {
                        prefix: "127.0.0.1/32".parse().expect("loopback prefix"),
                        priority: 0,
                        policy: Arc::clone(&deny_all),
                    },
                    OrderedPolicy {
                        prefix: "::1/128".parse().expect("loopback prefix"),
                        priority: 0,
                        policy: deny_all,
                    },
                ];
            } else {
                policy::sort_ordered(&mut ordered);
            }
            target.ordered = ordered;
        }
    }
}

mod duration {
    use std::time::Duration;

    use serde::de::{Deserialize, Deserializer, Error};

    /// Parse durations written as `<number><unit>` with units `ms`, `s`,
    /// `m`, or `h`. A bare `0` is accepted.
    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        parse(&text).map_err(D::Error::custom)
    }

    pub(super) fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if text == "0" {
            return Ok(Duration::ZERO);
        }
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration {text:?}"))?;
        let (number, unit) = text.split_at(split);
        let number: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration {text:?}"))?;
        match unit {
            "ms" => Ok(Duration::from_millis(number)),
            "s" => Ok(Duration::from_secs(number)),
            "m" => Ok(Duration::from_secs(number * 60)),
            "h" => Ok(Duration::from_secs(number * 3600)),
            _ => Err(format!("unknown duration unit {unit:?}")),
        }
    }

}
