//! Execution settings shared by dataset nodes and remote workers.
//!
//! Settings can be built in code, parsed from a JSON document, or read from
//! `SKETCH_*` environment variables:
//! - `SKETCH_LOCAL_THREADS`: `true`/`false`
//! - `SKETCH_BUNDLE_INTERVAL_MS`: coalescing window of parallel nodes (0 disables bundling)
//! - `SKETCH_MAILBOX_CAPACITY`: bounded queue length of a remote worker
//! - `SKETCH_POLL_INTERVAL_MS`: how often blocked loops check for cancellation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run every local leaf on its own thread.
    pub local_threads: bool,
    /// Coalescing window for partial results of parallel nodes, in milliseconds.
    pub bundle_interval_ms: u64,
    /// Number of requests a remote worker queues before submitters block.
    pub mailbox_capacity: usize,
    /// Interval at which waiting loops re-check cancellation, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_threads: true,
            bundle_interval_ms: 0,
            mailbox_capacity: 64,
            poll_interval_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Parse settings from JSON; omitted fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()
    }

    /// Read settings from `SKETCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("SKETCH_LOCAL_THREADS") {
            config.local_threads = parse(&v, "local_threads")?;
        }
        if let Some(v) = lookup("SKETCH_BUNDLE_INTERVAL_MS") {
            config.bundle_interval_ms = parse(&v, "bundle_interval_ms")?;
        }
        if let Some(v) = lookup("SKETCH_MAILBOX_CAPACITY") {
            config.mailbox_capacity = parse(&v, "mailbox_capacity")?;
        }
        if let Some(v) = lookup("SKETCH_POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse(&v, "poll_interval_ms")?;
        }
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.mailbox_capacity == 0 {
            return Err(Error::invalid("mailbox_capacity", "must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::invalid("poll_interval_ms", "must be positive"));
        }
        Ok(self)
    }

    pub fn with_local_threads(mut self, local_threads: bool) -> Self {
        self.local_threads = local_threads;
        self
    }

    pub fn with_bundle_interval(mut self, interval: Duration) -> Self {
        self.bundle_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn bundle_interval(&self) -> Duration {
        Duration::from_millis(self.bundle_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse<V: std::str::FromStr>(value: &str, name: &'static str) -> Result<V> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid(name, format!("cannot parse `{value}`")))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test]
    fn test_defaults_from_empty_json() {
        assert_eq!(EngineConfig::from_json("{}"), Ok(EngineConfig::default()));
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(r#"{"bundle_interval_ms": 250}"#).unwrap();
        assert_eq!(config.bundle_interval(), Duration::from_millis(250));
        assert!(config.local_threads);
    }

    #[test_case(r#"{"mailbox_capacity": 0}"#; "zero mailbox")]
    #[test_case(r#"{"poll_interval_ms": 0}"#; "zero poll interval")]
    #[test_case(r#"{"local_threads": "yes"}"#; "wrong type")]
    fn test_invalid_json(text: &str) {
        assert!(EngineConfig::from_json(text).is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SKETCH_LOCAL_THREADS", "false"),
            ("SKETCH_MAILBOX_CAPACITY", " 8 "),
        ]
        .into_iter()
        .collect();
        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert!(!config.local_threads);
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.bundle_interval_ms, 0);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|key| {
            (key == "SKETCH_BUNDLE_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(Error::InvalidParameter {
                name: "bundle_interval_ms",
                ..
            })
        ));
    }
}
