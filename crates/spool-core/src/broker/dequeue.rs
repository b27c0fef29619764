//! Dequeue: pop the next pending task and lease it to a worker.

use tracing::debug;

use crate::broker::Broker;
use crate::broker::helpers::{after, load, parse_id, set_state, write_lease};
use crate::domain::{Lease, Leased, WorkerId};
use crate::error::BrokerResult;
use crate::ports::{StateStore, StoreError};
use crate::queue::TaskState;

impl<S: StateStore> Broker<S> {
    /// Leases the next pending task from the configured queues, ordered by the priority policy.
    ///
    /// `Ok(None)` when nothing is pending. Never blocks; see `app::Poller` for the waiting loop.
    pub async fn dequeue(&self, worker: &WorkerId) -> BrokerResult<Option<Leased>> {
        let order = self.inner.selector.order(&mut rand::thread_rng());
        self.dequeue_from(worker, &order).await
    }

    /// Leases the next pending task, trying `queues` in the given order. Paused queues are
    /// skipped.
    pub async fn dequeue_from(
        &self,
        worker: &WorkerId,
        queues: &[String],
    ) -> BrokerResult<Option<Leased>> {
        let now = self.now();
        let expires_at = after(now, self.inner.config.lease_duration());
        let keys = &self.inner.keys;

        let leased = self
            .inner
            .store
            .atomically(|tx| -> BrokerResult<Option<Leased>> {
                let paused = tx.smembers(&keys.paused())?;
                for queue in queues {
                    if paused.contains(queue) {
                        continue;
                    }
                    let pending = keys.pending(queue);
                    // peek first: a corrupt head stays in Pending
                    let Some(raw) = tx.lfront(&pending)? else {
                        continue;
                    };
                    let id = parse_id(&pending, &raw)?;
                    let Some((task, _)) = load(tx, keys, queue, &id)? else {
                        return Err(StoreError::Corrupt {
                            key: keys.task(queue, &id),
                            reason: "pending id without record".to_string(),
                        }
                        .into());
                    };
                    tx.lpop(&pending)?;
                    let lease = Lease {
                        task_id: id,
                        worker: *worker,
                        expires_at,
                    };
                    write_lease(tx, keys, queue, &lease)?;
                    set_state(tx, keys, queue, &id, TaskState::Active)?;
                    return Ok(Some(Leased { task, lease }));
                }
                Ok(None)
            })
            .await?;

        if let Some(leased) = &leased {
            debug!(
                task_id = %leased.task_id(),
                queue = %leased.task.queue(),
                worker = %worker,
                "leased"
            );
        }
        Ok(leased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{broker, broker_with, config};
    use crate::domain::{EnqueueOptions, TaskId};
    use crate::error::BrokerError;
    use crate::ports::Clock;
    use crate::queue::PriorityPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn empty_queues_yield_none() {
        let (broker, _) = broker();
        assert!(broker.dequeue(&WorkerId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_moves_task_to_active_with_lease() {
        let (broker, clock) = broker();
        let worker = WorkerId::generate();
        let id = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();

        let leased = broker.dequeue(&worker).await.unwrap().unwrap();
        assert_eq!(leased.task_id(), id);
        assert_eq!(leased.lease.worker, worker);
        assert_eq!(
            leased.lease.expires_at,
            clock.now() + chrono::Duration::seconds(30)
        );

        let info = broker.get_task(id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Active);
        assert!(broker.list_pending("default").await.unwrap().is_empty());
        assert_eq!(broker.list_active("default").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn strict_priority_drains_heavier_queue_first() {
        let mut cfg = config();
        cfg.priority = PriorityPolicy::Strict;
        let (broker, _) = broker_with(cfg);
        let worker = WorkerId::generate();

        let low = broker
            .enqueue("t", json!({}), EnqueueOptions::new().queue("default"))
            .await
            .unwrap();
        let high = broker
            .enqueue("t", json!({}), EnqueueOptions::new().queue("critical"))
            .await
            .unwrap();

        let first = broker.dequeue(&worker).await.unwrap().unwrap();
        let second = broker.dequeue(&worker).await.unwrap().unwrap();
        assert_eq!(first.task_id(), high);
        assert_eq!(second.task_id(), low);
    }

    #[tokio::test]
    async fn paused_queue_is_skipped() {
        let (broker, _) = broker();
        let worker = WorkerId::generate();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();

        broker.pause_queue("default").await.unwrap();
        assert!(broker.dequeue(&worker).await.unwrap().is_none());

        broker.unpause_queue("default").await.unwrap();
        assert!(broker.dequeue(&worker).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dequeue_from_honors_given_order() {
        let (broker, _) = broker();
        let worker = WorkerId::generate();
        let a = broker
            .enqueue("t", json!({}), EnqueueOptions::new().queue("default"))
            .await
            .unwrap();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new().queue("critical"))
            .await
            .unwrap();

        let order = vec!["default".to_string(), "critical".to_string()];
        let leased = broker.dequeue_from(&worker, &order).await.unwrap().unwrap();
        assert_eq!(leased.task_id(), a);
    }

    #[tokio::test]
    async fn record_less_head_stays_in_pending() {
        let (broker, _) = broker();
        let pending = broker.keys().pending("default");
        let stray = TaskId::generate().to_string();
        broker
            .store()
            .atomically::<_, StoreError, _>(|tx| tx.rpush(&pending, &stray))
            .await
            .unwrap();

        let err = broker.dequeue(&WorkerId::generate()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Store(StoreError::Corrupt { .. })));
        let len = broker
            .store()
            .atomically::<_, StoreError, _>(|tx| tx.llen(&pending))
            .await
            .unwrap();
        assert_eq!(len, 1);
    }
}
