//! Lease management: heartbeat renewal and recovery of expired leases.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::broker::Broker;
use crate::broker::helpers::{
    after, detach, load, locate, parse_id, read_lease, score, write_lease, write_record,
};
use crate::domain::{Lease, TaskId, WorkerId};
use crate::error::{BrokerError, BrokerResult};
use crate::ports::StateStore;
use crate::queue::TaskState;

impl<S: StateStore> Broker<S> {
    /// Extends the lease held by `worker` on `id` and returns the new expiry.
    ///
    /// # Errors
    /// - `TaskNotFound`: the task no longer exists
    /// - `LeaseExpired`: the task is no longer Active, or its lease has run out
    /// - `LeaseNotOwned`: another worker holds the lease
    pub async fn renew_lease(&self, id: TaskId, worker: &WorkerId) -> BrokerResult<DateTime<Utc>> {
        let now = self.now();
        let expires_at = after(now, self.inner.config.lease_duration());
        let keys = &self.inner.keys;

        self.inner
            .store
            .atomically(|tx| -> BrokerResult<DateTime<Utc>> {
                let found = locate(tx, keys, &id)?;
                if found.state != TaskState::Active {
                    return Err(BrokerError::LeaseExpired(id));
                }
                let Some(current) = read_lease(tx, keys, &found.queue, &id)? else {
                    return Err(BrokerError::LeaseExpired(id));
                };
                if current.worker != *worker {
                    return Err(BrokerError::LeaseNotOwned {
                        task_id: id,
                        holder: current.worker,
                    });
                }
                if current.is_expired(now) {
                    return Err(BrokerError::LeaseExpired(id));
                }
                let renewed = Lease {
                    expires_at,
                    ..current
                };
                write_lease(tx, keys, &found.queue, &renewed)?;
                Ok(expires_at)
            })
            .await
    }

    /// Returns every Active task of `queue` whose lease has expired to the front of Pending.
    ///
    /// Each recovery bumps the task's orphaned count and the queue's `orphaned` counter. The retry
    /// count is untouched.
    pub async fn recover_expired(&self, queue: &str) -> BrokerResult<Vec<TaskId>> {
        let now = self.now();
        let keys = &self.inner.keys;

        let recovered = self
            .inner
            .store
            .atomically(|tx| -> BrokerResult<Vec<TaskId>> {
                let active = keys.active(queue);
                let expired = tx.zrange_by_score(&active, score(now), usize::MAX)?;
                let mut recovered = Vec::with_capacity(expired.len());
                // latest expiry first, so after lpush the earliest sits at the head
                for (member, _) in expired.into_iter().rev() {
                    let id = parse_id(&active, &member)?;
                    let still_expired = read_lease(tx, keys, queue, &id)?
                        .is_none_or(|lease| lease.is_expired(now));
                    if !still_expired {
                        continue;
                    }
                    detach(tx, keys, queue, &id, TaskState::Active)?;
                    match load(tx, keys, queue, &id)? {
                        Some((mut msg, _)) => {
                            msg.increment_orphaned();
                            write_record(tx, keys, &msg, TaskState::Pending)?;
                            tx.lpush(&keys.pending(queue), &member)?;
                            recovered.push(id);
                        }
                        None => {
                            debug!(task_id = %id, "dropping active id without record");
                        }
                    }
                }
                if !recovered.is_empty() {
                    let n = i64::try_from(recovered.len()).unwrap_or(i64::MAX);
                    tx.incr_by(&keys.orphaned(queue), n)?;
                }
                recovered.reverse();
                Ok(recovered)
            })
            .await?;

        for id in &recovered {
            info!(task_id = %id, queue = %queue, "recovered orphaned task");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::broker;
    use crate::domain::EnqueueOptions;
    use crate::ports::Clock;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn renew_extends_expiry() {
        let (broker, clock) = broker();
        let worker = WorkerId::generate();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let leased = broker.dequeue(&worker).await.unwrap().unwrap();

        clock.advance(Duration::from_secs(20));
        let new_expiry = broker.renew_lease(leased.task_id(), &worker).await.unwrap();
        assert_eq!(new_expiry, clock.now() + chrono::Duration::seconds(30));

        // the old expiry has passed but the renewed lease keeps the task active
        clock.advance(Duration::from_secs(20));
        assert!(broker.recover_expired("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn renew_error_precedence() {
        let (broker, clock) = broker();
        let worker = WorkerId::generate();
        let other = WorkerId::generate();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let leased = broker.dequeue(&worker).await.unwrap().unwrap();
        let id = leased.task_id();

        match broker.renew_lease(id, &other).await {
            Err(BrokerError::LeaseNotOwned { holder, .. }) => assert_eq!(holder, worker),
            other => panic!("unexpected {other:?}"),
        }

        clock.advance(Duration::from_secs(31));
        assert!(matches!(
            broker.renew_lease(id, &worker).await,
            Err(BrokerError::LeaseExpired(_))
        ));

        broker.recover_expired("default").await.unwrap();
        assert!(matches!(
            broker.renew_lease(id, &worker).await,
            Err(BrokerError::LeaseExpired(_))
        ));

        assert!(matches!(
            broker.renew_lease(TaskId::generate(), &worker).await,
            Err(BrokerError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn recovery_requeues_to_front_and_counts_orphans() {
        let (broker, clock) = broker();
        let worker = WorkerId::generate();
        let first = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let waiting = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        broker.dequeue(&worker).await.unwrap().unwrap();

        clock.advance(Duration::from_secs(29));
        assert!(broker.recover_expired("default").await.unwrap().is_empty());

        clock.advance(Duration::from_secs(1));
        let recovered = broker.recover_expired("default").await.unwrap();
        assert_eq!(recovered, vec![first]);

        let pending: Vec<TaskId> = broker
            .list_pending("default")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.task.id())
            .collect();
        assert_eq!(pending, vec![first, waiting]);

        let info = broker.get_task(first).await.unwrap().unwrap();
        assert_eq!(info.task.orphaned(), 1);
        assert_eq!(info.task.retried(), 0);
        assert_eq!(broker.queue_stats("default").await.unwrap().orphaned, 1);
    }
}
