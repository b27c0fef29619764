//! Outcome reporting for leased tasks: done, retry, kill, requeue.

use std::time::Duration;

use tracing::{debug, info};

use crate::broker::helpers::{
    after, detach, locate, purge, release_unique, score, set_state, trim_dead_in, write_record,
};
use crate::broker::{Broker, RetryOutcome};
use crate::domain::TaskId;
use crate::error::{BrokerError, BrokerResult};
use crate::ports::StateStore;
use crate::queue::{RetryPolicy, TaskState};

impl<S: StateStore> Broker<S> {
    /// Completes an Active task and discards it.
    ///
    /// Lease ownership is not checked: a worker finishing after its lease ran out, but before the
    /// task was recovered, still completes it.
    pub async fn done(&self, id: TaskId) -> BrokerResult<()> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<()> {
                let found = locate(tx, keys, &id)?;
                if found.state != TaskState::Active {
                    return Err(BrokerError::TaskNotFound(id));
                }
                detach(tx, keys, &found.queue, &id, TaskState::Active)?;
                purge(tx, keys, &found.queue, &id)?;
                release_unique(tx, keys, &found.msg)?;
                tx.incr_by(&keys.processed(&found.queue), 1)?;
                Ok(())
            })
            .await?;
        debug!(task_id = %id, "done");
        Ok(())
    }

    /// Reports a handler failure.
    ///
    /// With retry budget left the task goes to Retry, due after `delay` or the backoff policy's
    /// delay. Otherwise it is dead-lettered.
    pub async fn retry(
        &self,
        id: TaskId,
        error: impl Into<String>,
        delay: Option<Duration>,
    ) -> BrokerResult<RetryOutcome> {
        let error = error.into();
        let now = self.now();
        let sample = RetryPolicy::sample(&mut rand::thread_rng());
        let config = &self.inner.config;
        let keys = &self.inner.keys;

        let outcome = self
            .inner
            .store
            .atomically(|tx| -> BrokerResult<RetryOutcome> {
                let mut found = locate(tx, keys, &id)?;
                if found.state != TaskState::Active {
                    return Err(BrokerError::TaskNotFound(id));
                }
                let queue = found.queue.as_str();
                detach(tx, keys, queue, &id, TaskState::Active)?;
                found.msg.record_failure(error, now);
                tx.incr_by(&keys.failed(queue), 1)?;

                if found.msg.retry_exhausted() {
                    write_record(tx, keys, &found.msg, TaskState::Dead)?;
                    tx.zadd(&keys.dead(queue), score(now), &id.to_string())?;
                    release_unique(tx, keys, &found.msg)?;
                    trim_dead_in(tx, keys, queue, now, &config.dead)?;
                    return Ok(RetryOutcome::Dead);
                }

                let delay = delay
                    .unwrap_or_else(|| config.retry.next_delay(found.msg.retried(), sample));
                let retry_at = after(now, delay);
                found.msg.increment_retried();
                write_record(tx, keys, &found.msg, TaskState::Retry)?;
                tx.zadd(&keys.retry(queue), score(retry_at), &id.to_string())?;
                Ok(RetryOutcome::Scheduled { retry_at })
            })
            .await?;

        match outcome {
            RetryOutcome::Dead => info!(task_id = %id, "retry budget exhausted; task is dead"),
            RetryOutcome::Scheduled { retry_at } => {
                debug!(task_id = %id, retry_at = %retry_at, "scheduled for retry")
            }
        }
        Ok(outcome)
    }

    /// Dead-letters a task from Active, Retry, Scheduled or Pending.
    ///
    /// `TaskNotFound` if it is already dead or gone.
    pub async fn kill(&self, id: TaskId, reason: impl Into<String>) -> BrokerResult<()> {
        let reason = reason.into();
        let now = self.now();
        let config = &self.inner.config;
        let keys = &self.inner.keys;

        self.inner
            .store
            .atomically(|tx| -> BrokerResult<()> {
                let mut found = locate(tx, keys, &id)?;
                if found.state == TaskState::Dead {
                    return Err(BrokerError::TaskNotFound(id));
                }
                let queue = found.queue.as_str();
                detach(tx, keys, queue, &id, found.state)?;
                found.msg.record_failure(reason, now);
                write_record(tx, keys, &found.msg, TaskState::Dead)?;
                tx.zadd(&keys.dead(queue), score(now), &id.to_string())?;
                release_unique(tx, keys, &found.msg)?;
                trim_dead_in(tx, keys, queue, now, &config.dead)?;
                Ok(())
            })
            .await?;
        info!(task_id = %id, "killed");
        Ok(())
    }

    /// Returns an Active task to the front of Pending without touching its retry count.
    pub async fn requeue(&self, id: TaskId) -> BrokerResult<()> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<()> {
                let found = locate(tx, keys, &id)?;
                if found.state != TaskState::Active {
                    return Err(BrokerError::TaskNotFound(id));
                }
                detach(tx, keys, &found.queue, &id, TaskState::Active)?;
                tx.lpush(&keys.pending(&found.queue), &id.to_string())?;
                set_state(tx, keys, &found.queue, &id, TaskState::Pending)?;
                Ok(())
            })
            .await?;
        debug!(task_id = %id, "requeued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{broker, broker_with, config};
    use crate::domain::{EnqueueOptions, Leased, WorkerId};
    use crate::ports::Clock;
    use serde_json::json;

    async fn leased_task<S: StateStore>(broker: &Broker<S>, options: EnqueueOptions) -> Leased {
        broker.enqueue("t", json!({}), options).await.unwrap();
        broker.dequeue(&WorkerId::generate()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn done_removes_task_and_counts_it() {
        let (broker, _) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new()).await;

        broker.done(leased.task_id()).await.unwrap();

        assert!(broker.get_task(leased.task_id()).await.unwrap().is_none());
        let stats = broker.queue_stats("default").await.unwrap();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn done_twice_is_task_not_found() {
        let (broker, _) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new()).await;
        broker.done(leased.task_id()).await.unwrap();
        let err = broker.done(leased.task_id()).await.unwrap_err();
        assert!(matches!(err, BrokerError::TaskNotFound(id) if id == leased.task_id()));
    }

    #[tokio::test]
    async fn done_on_pending_task_is_rejected() {
        let (broker, _) = broker();
        let id = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        assert!(matches!(
            broker.done(id).await,
            Err(BrokerError::TaskNotFound(_))
        ));
        assert_eq!(broker.list_pending("default").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_uses_backoff_and_records_error() {
        let (broker, clock) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new().max_retry(3)).await;

        let outcome = broker
            .retry(leased.task_id(), "boom", None)
            .await
            .unwrap();
        // jitter is disabled in the test config: scale 10s * 2^0
        assert_eq!(
            outcome,
            RetryOutcome::Scheduled {
                retry_at: clock.now() + chrono::Duration::seconds(10)
            }
        );

        let info = broker.get_task(leased.task_id()).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Retry);
        assert_eq!(info.task.retried(), 1);
        assert_eq!(info.task.error_msg(), Some("boom"));
        assert_eq!(info.task.last_failed_at(), Some(clock.now()));
        assert_eq!(broker.queue_stats("default").await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn explicit_delay_overrides_policy() {
        let (broker, clock) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new()).await;
        let outcome = broker
            .retry(leased.task_id(), "later", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::Scheduled {
                retry_at: clock.now() + chrono::Duration::seconds(5)
            }
        );
    }

    #[tokio::test]
    async fn zero_max_retry_dies_on_first_failure() {
        let (broker, _) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new().max_retry(0)).await;
        let outcome = broker.retry(leased.task_id(), "x", None).await.unwrap();
        assert_eq!(outcome, RetryOutcome::Dead);

        let dead = broker.list_dead("default").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task.retried(), 0);
    }

    #[tokio::test]
    async fn kill_moves_any_live_task_to_dead() {
        let (broker, clock) = broker();
        let pending = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let scheduled = broker
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::new().process_in(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        broker.kill(pending, "operator").await.unwrap();
        broker.kill(scheduled, "operator").await.unwrap();

        let stats = broker.queue_stats("default").await.unwrap();
        assert_eq!((stats.pending, stats.scheduled, stats.dead), (0, 0, 2));
        let dead = broker.list_dead("default").await.unwrap();
        assert!(dead.iter().all(|i| i.at == Some(clock.now())));
        assert!(dead.iter().all(|i| i.task.error_msg() == Some("operator")));

        assert!(matches!(
            broker.kill(pending, "again").await,
            Err(BrokerError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn kill_evicts_oldest_dead_beyond_cap() {
        let mut cfg = config();
        cfg.dead.max_count = 2;
        let (broker, clock) = broker_with(cfg);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = broker
                .enqueue("t", json!({}), EnqueueOptions::new())
                .await
                .unwrap();
            broker.kill(id, "x").await.unwrap();
            ids.push(id);
            clock.advance(Duration::from_secs(1));
        }

        let dead: Vec<TaskId> = broker
            .list_dead("default")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.task.id())
            .collect();
        assert_eq!(dead, ids[1..].to_vec());
        assert!(broker.get_task(ids[0]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_puts_task_in_front_keeping_retry_count() {
        let (broker, _) = broker();
        let leased = leased_task(&broker, EnqueueOptions::new()).await;
        let later = broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();

        broker.requeue(leased.task_id()).await.unwrap();

        let pending: Vec<TaskId> = broker
            .list_pending("default")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.task.id())
            .collect();
        assert_eq!(pending, vec![leased.task_id(), later]);
        let info = broker.get_task(leased.task_id()).await.unwrap().unwrap();
        assert_eq!(info.task.retried(), 0);
        assert!(matches!(
            broker.requeue(leased.task_id()).await,
            Err(BrokerError::TaskNotFound(_))
        ));
    }
}
