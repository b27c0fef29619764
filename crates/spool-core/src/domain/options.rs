//! Per-enqueue options.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// How the uniqueness lock for a task is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Uniqueness {
    /// No deduplication.
    #[default]
    None,
    /// Lock for `window`. The key is derived from task type + payload.
    Derived { window: Option<Duration> },
    /// Lock an explicit key for `window`.
    Key { key: String, window: Option<Duration> },
}

impl Uniqueness {
    /// `window` of `None` means the configured default uniqueness window.
    pub fn window(&self) -> Option<Option<Duration>> {
        match self {
            Uniqueness::None => None,
            Uniqueness::Derived { window } | Uniqueness::Key { window, .. } => Some(*window),
        }
    }
}

/// Options accepted by `Broker::enqueue`.
///
/// # 使用例
/// ```ignore
/// let opts = EnqueueOptions::new()
///     .queue("critical")
///     .max_retry(3)
///     .process_in(Duration::from_secs(60))
///     .unique_key("order-42", Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    pub queue: Option<String>,
    pub max_retry: Option<u32>,
    pub timeout: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    pub process_at: Option<DateTime<Utc>>,
    pub process_in: Option<Duration>,
    pub uniqueness: Uniqueness,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn max_retry(mut self, n: u32) -> Self {
        self.max_retry = Some(n);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    pub fn process_in(mut self, delay: Duration) -> Self {
        self.process_in = Some(delay);
        self
    }

    /// Deduplicate on task type + payload using the configured window.
    pub fn unique(mut self) -> Self {
        self.uniqueness = Uniqueness::Derived { window: None };
        self
    }

    pub fn unique_for(mut self, window: Duration) -> Self {
        self.uniqueness = Uniqueness::Derived {
            window: Some(window),
        };
        self
    }

    pub fn unique_key(mut self, key: impl Into<String>, window: Duration) -> Self {
        self.uniqueness = Uniqueness::Key {
            key: key.into(),
            window: Some(window),
        };
        self
    }
}
