//! Broker - task lifecycle の状態遷移エンジン
//!
//! queue 構造を変更するのは Broker だけです。各操作は `StateStore::atomically` 1 回分の
//! transaction で、途中の状態は誰からも見えません。
//!
//! # サブモジュール
//! - `enqueue`: 検証 + uniqueness lock + Pending/Scheduled への投入
//! - `dequeue`: priority 順に Pending を pop して lease を付与
//! - `complete`: done / retry / kill / requeue
//! - `lease`: renew_lease と期限切れ lease の回収
//! - `forward`: due になった Scheduled/Retry を Pending へ
//! - `cleanup`: Dead の retention
//! - `inspect`: 読み取り専用の一覧・統計
//! - `admin`: pause / run_task / delete_task
//!
//! # 使用例
//! ```ignore
//! let broker = Broker::new(MemoryStore::default(), BrokerConfig::default())?;
//! let id = broker.enqueue("email:send", json!({"to": "a@b"}), EnqueueOptions::new()).await?;
//! if let Some(leased) = broker.dequeue(&worker).await? {
//!     broker.done(leased.task_id()).await?;
//! }
//! ```

mod admin;
mod cleanup;
mod complete;
mod dequeue;
mod enqueue;
mod forward;
pub(crate) mod helpers;
mod inspect;
mod lease;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;
use crate::domain::TaskMessage;
use crate::error::ConfigError;
use crate::keys::Keys;
use crate::ports::{Clock, IdGenerator, StateStore, SystemClock, UlidGenerator};
use crate::queue::{QueueSelector, TaskState};

/// Explicitly constructed broker handle. Cheap to clone; clones share everything.
pub struct Broker<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    store: S,
    config: BrokerConfig,
    keys: Keys,
    selector: QueueSelector,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl<S> Clone for Broker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StateStore> Broker<S> {
    pub fn new(store: S, config: BrokerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Same as [`Broker::new`] with a substitute clock.
    pub fn with_clock(
        store: S,
        config: BrokerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = Keys::new(config.key_prefix.clone());
        let selector = QueueSelector::new(&config.queues, config.priority);
        let ids = Box::new(UlidGenerator::new(Arc::clone(&clock)));
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                config,
                keys,
                selector,
                clock,
                ids,
            }),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn keys(&self) -> &Keys {
        &self.inner.keys
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}

/// What `Broker::retry` did with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back in Retry; forwarded to Pending at `retry_at`.
    Scheduled { retry_at: DateTime<Utc> },
    /// Retry budget exhausted.
    Dead,
}

/// A task as seen by inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub task: TaskMessage,
    pub state: TaskState,
    /// Score of the holding structure: process-at, retry-at, lease expiry or time of death.
    /// `None` for Pending.
    pub at: Option<DateTime<Utc>>,
}

/// Sizes and lifetime counters of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub paused: bool,
    pub pending: usize,
    pub active: usize,
    pub scheduled: usize,
    pub retry: usize,
    pub dead: usize,
    pub processed: u64,
    pub failed: u64,
    pub orphaned: u64,
}

impl QueueStats {
    /// Tasks that still hold a place in the queue, Dead included.
    pub fn total(&self) -> usize {
        self.pending + self.active + self.scheduled + self.retry + self.dead
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::TimeZone;
    use chrono::Utc;

    use super::Broker;
    use crate::config::BrokerConfig;
    use crate::impls::MemoryStore;
    use crate::ports::FixedClock;

    pub(crate) fn config() -> BrokerConfig {
        let mut config = BrokerConfig::default().with_queues([("default", 3), ("critical", 6)]);
        config.retry.jitter = 0.0;
        config
    }

    pub(crate) fn broker_with(config: BrokerConfig) -> (Broker<MemoryStore>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = MemoryStore::new(clock.clone());
        let broker = Broker::with_clock(store, config, clock.clone()).unwrap();
        (broker, clock)
    }

    pub(crate) fn broker() -> (Broker<MemoryStore>, Arc<FixedClock>) {
        broker_with(config())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::broker;
    use crate::domain::{EnqueueOptions, WorkerId};
    use crate::error::{BrokerError, ErrorKind};
    use crate::ports::StoreError;

    #[tokio::test]
    async fn offline_store_surfaces_as_transient_and_changes_nothing() {
        let (broker, _) = broker();
        let worker = WorkerId::generate();
        let id = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let keys_before = broker.store().key_count().await;

        broker.store().set_offline(true);
        let err = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Store(StoreError::Unavailable(_))));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert!(broker.dequeue(&worker).await.unwrap_err().is_retryable());

        broker.store().set_offline(false);
        assert_eq!(broker.store().key_count().await, keys_before);
        let leased = broker.dequeue(&worker).await.unwrap().unwrap();
        assert_eq!(leased.task_id(), id);
        assert!(broker.dequeue(&worker).await.unwrap().is_none());
    }
}
