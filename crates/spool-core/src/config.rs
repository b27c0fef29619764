//! Broker configuration.
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only needs the keys it
//! changes. `BrokerConfig::validate` runs at `Broker::new` and rejects unusable combinations
//! before anything touches the store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, validate_queue_name};
use crate::queue::{PriorityPolicy, RetryPolicy};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// First segment of every key.
    pub key_prefix: String,
    pub priority: PriorityPolicy,
    pub lease_duration_ms: u64,
    /// How often workers are expected to renew. Only used to check the lease margin.
    pub heartbeat_interval_ms: u64,
    pub default_max_retry: u32,
    /// Applied when a task has neither timeout nor deadline.
    pub default_timeout_secs: u64,
    /// Used by uniqueness requests that give no window.
    pub unique_window_secs: u64,
    /// Queue name -> priority weight.
    pub queues: BTreeMap<String, u32>,
    pub retry: RetryPolicy,
    pub dead: DeadRetention,
    pub forwarder: ForwarderConfig,
    pub recoverer: RecovererConfig,
    pub janitor: JanitorConfig,
    pub poll: PollConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let queues = [("critical", 6), ("default", 3), ("low", 1)]
            .into_iter()
            .map(|(q, w)| (q.to_string(), w))
            .collect();
        Self {
            key_prefix: "spool".to_string(),
            priority: PriorityPolicy::Weighted,
            lease_duration_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            default_max_retry: 25,
            default_timeout_secs: 1_800,
            unique_window_secs: 3_600,
            queues,
            retry: RetryPolicy::default(),
            dead: DeadRetention::default(),
            forwarder: ForwarderConfig::default(),
            recoverer: RecovererConfig::default(),
            janitor: JanitorConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

/// Dead-letter retention. `0` disables a bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadRetention {
    pub max_count: usize,
    pub max_age_secs: u64,
}

impl Default for DeadRetention {
    fn default() -> Self {
        Self {
            max_count: 10_000,
            max_age_secs: 90 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub interval_ms: u64,
    /// Max tasks moved per transaction.
    pub batch_size: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecovererConfig {
    pub interval_ms: u64,
}

impl Default for RecovererConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    pub interval_ms: u64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
        }
    }
}

/// Backoff of the blocking dequeue loop when every queue is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl BrokerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn unique_window(&self) -> Duration {
        Duration::from_secs(self.unique_window_secs)
    }

    /// Replaces the queue map with a single queue. Handy in tests and demos.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(|(q, w)| (q.into(), w)).collect();
        self
    }

    /// The queue used when an enqueue names none: `default` if configured, otherwise the
    /// heaviest queue.
    pub fn default_queue(&self) -> Option<&str> {
        if self.queues.contains_key(DEFAULT_QUEUE) {
            return Some(DEFAULT_QUEUE);
        }
        self.queues
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(q, _)| q.as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return invalid(format!("key_prefix {:?} must be non-empty without ':'", self.key_prefix));
        }
        if self.queues.is_empty() {
            return invalid("at least one queue must be configured".to_string());
        }
        for (name, weight) in &self.queues {
            validate_queue_name(name).map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if *weight == 0 {
                return invalid(format!("queue {name:?} has weight 0"));
            }
        }
        if self.heartbeat_interval_ms == 0 {
            return invalid("heartbeat_interval_ms must be positive".to_string());
        }
        if self.lease_duration_ms < self.heartbeat_interval_ms.saturating_mul(2) {
            return invalid(format!(
                "lease_duration_ms ({}) must be at least twice heartbeat_interval_ms ({})",
                self.lease_duration_ms, self.heartbeat_interval_ms
            ));
        }
        if self.unique_window_secs == 0 {
            return invalid("unique_window_secs must be positive".to_string());
        }
        self.retry.validate().map_err(ConfigError::Invalid)?;
        if self.forwarder.interval_ms == 0
            || self.recoverer.interval_ms == 0
            || self.janitor.interval_ms == 0
        {
            return invalid("loop intervals must be positive".to_string());
        }
        if self.forwarder.batch_size == 0 {
            return invalid("forwarder.batch_size must be positive".to_string());
        }
        if self.poll.min_backoff_ms == 0 || self.poll.min_backoff_ms > self.poll.max_backoff_ms {
            return invalid(format!(
                "poll backoff must satisfy 0 < min ({}) <= max ({})",
                self.poll.min_backoff_ms, self.poll.max_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Parses a TOML document into any config shape.
pub fn from_toml_str<T: DeserializeOwned>(s: &str) -> Result<T, ConfigError> {
    Ok(toml::from_str(s)?)
}

/// Reads and parses a TOML file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path)?;
    from_toml_str(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, Deserialize)]
    struct File {
        broker: BrokerConfig,
    }

    #[test]
    fn defaults_are_valid() {
        BrokerConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let file: File = from_toml_str(
            r#"
            [broker]
            priority = "strict"
            lease_duration_ms = 60000

            [broker.queues]
            emails = 2

            [broker.retry]
            jitter = 0.0
            "#,
        )
        .unwrap();
        let cfg = file.broker;
        assert_eq!(cfg.priority, PriorityPolicy::Strict);
        assert_eq!(cfg.lease_duration(), Duration::from_secs(60));
        assert_eq!(cfg.queues.len(), 1);
        assert_eq!(cfg.queues["emails"], 2);
        assert_eq!(cfg.retry.jitter, 0.0);
        assert_eq!(cfg.retry.scale_ms, 10_000);
        assert_eq!(cfg.default_queue(), Some("emails"));
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_priority_is_a_parse_error() {
        let err = from_toml_str::<File>("[broker]\npriority = \"fifo\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[rstest]
    #[case::no_queues(|c: &mut BrokerConfig| c.queues.clear())]
    #[case::zero_weight(|c: &mut BrokerConfig| { c.queues.insert("x".into(), 0); })]
    #[case::bad_name(|c: &mut BrokerConfig| { c.queues.insert("a:b".into(), 1); })]
    #[case::thin_lease(|c: &mut BrokerConfig| c.lease_duration_ms = 9_000)]
    #[case::base_below_one(|c: &mut BrokerConfig| c.retry.base = 0.5)]
    #[case::jitter_too_wide(|c: &mut BrokerConfig| c.retry.jitter = 1.0)]
    #[case::inverted_poll(|c: &mut BrokerConfig| c.poll.min_backoff_ms = 5_000)]
    #[case::zero_interval(|c: &mut BrokerConfig| c.recoverer.interval_ms = 0)]
    #[case::bad_prefix(|c: &mut BrokerConfig| c.key_prefix = "a:b".into())]
    fn rejects_invalid(#[case] tweak: fn(&mut BrokerConfig)) {
        let mut cfg = BrokerConfig::default();
        tweak(&mut cfg);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_queue_prefers_named_default() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.default_queue(), Some(DEFAULT_QUEUE));

        let cfg = cfg.with_queues([("a", 1), ("b", 5)]);
        assert_eq!(cfg.default_queue(), Some("b"));
    }
}
