//! Administrative operations: pausing queues, running and deleting tasks by hand.

use tracing::info;

use crate::broker::Broker;
use crate::broker::helpers::{
    after, detach, live_holder, locate, purge, release_unique, set_state,
};
use crate::domain::TaskId;
use crate::error::{BrokerError, BrokerResult, ValidationError, validate_queue_name};
use crate::ports::StateStore;
use crate::queue::TaskState;

impl<S: StateStore> Broker<S> {
    /// Stops Dequeue from taking tasks out of `queue`. Enqueue keeps accepting tasks.
    pub async fn pause_queue(&self, queue: &str) -> BrokerResult<()> {
        self.check_configured(queue)?;
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<bool> { Ok(tx.sadd(&keys.paused(), queue)?) })
            .await?;
        info!(queue = %queue, "queue paused");
        Ok(())
    }

    pub async fn unpause_queue(&self, queue: &str) -> BrokerResult<()> {
        self.check_configured(queue)?;
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<bool> { Ok(tx.srem(&keys.paused(), queue)?) })
            .await?;
        info!(queue = %queue, "queue unpaused");
        Ok(())
    }

    /// Moves a Scheduled, Retry or Dead task to the tail of Pending right away.
    ///
    /// A revived Dead task keeps its retry count and takes its uniqueness lock back for a fresh
    /// `unique_window_secs`; `DuplicateTask` if another live task holds the key meanwhile.
    /// Running a Pending task is a no-op; an Active task is `TaskNotFound`.
    pub async fn run_task(&self, id: TaskId) -> BrokerResult<()> {
        let keys = &self.inner.keys;
        let relock_until = after(self.now(), self.inner.config.unique_window());
        let from = self
            .inner
            .store
            .atomically(|tx| -> BrokerResult<TaskState> {
                let found = locate(tx, keys, &id)?;
                let relock = match (found.state, found.msg.unique_key()) {
                    (TaskState::Dead, Some(key)) => {
                        let lock_key = keys.unique(&found.queue, key);
                        if let Some(existing) = live_holder(tx, keys, &found.queue, &lock_key)?
                            && existing != id
                        {
                            return Err(BrokerError::DuplicateTask {
                                key: key.to_string(),
                                existing,
                            });
                        }
                        Some(lock_key)
                    }
                    _ => None,
                };
                match found.state {
                    TaskState::Pending => {}
                    TaskState::Active => return Err(BrokerError::TaskNotFound(id)),
                    state @ (TaskState::Scheduled | TaskState::Retry | TaskState::Dead) => {
                        if let Some(lock_key) = &relock {
                            tx.set(lock_key, &id.to_string(), Some(relock_until))?;
                        }
                        detach(tx, keys, &found.queue, &id, state)?;
                        tx.rpush(&keys.pending(&found.queue), &id.to_string())?;
                        set_state(tx, keys, &found.queue, &id, TaskState::Pending)?;
                    }
                }
                Ok(found.state)
            })
            .await?;
        info!(task_id = %id, from = %from, "task run by hand");
        Ok(())
    }

    /// Removes a task that is not Active, record and all.
    pub async fn delete_task(&self, id: TaskId) -> BrokerResult<()> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<()> {
                let found = locate(tx, keys, &id)?;
                if found.state == TaskState::Active {
                    return Err(BrokerError::TaskNotFound(id));
                }
                detach(tx, keys, &found.queue, &id, found.state)?;
                purge(tx, keys, &found.queue, &id)?;
                release_unique(tx, keys, &found.msg)?;
                Ok(())
            })
            .await?;
        info!(task_id = %id, "task deleted");
        Ok(())
    }

    fn check_configured(&self, queue: &str) -> BrokerResult<()> {
        validate_queue_name(queue)?;
        if !self.inner.config.queues.contains_key(queue) {
            return Err(ValidationError::UnknownQueue(queue.to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::broker;
    use crate::domain::{EnqueueOptions, WorkerId};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn pause_unknown_queue_is_rejected() {
        let (broker, _) = broker();
        assert!(matches!(
            broker.pause_queue("nope").await,
            Err(BrokerError::Validation(ValidationError::UnknownQueue(_)))
        ));
    }

    #[tokio::test]
    async fn paused_queue_shows_in_stats() {
        let (broker, _) = broker();
        broker.pause_queue("critical").await.unwrap();
        assert!(broker.queue_stats("critical").await.unwrap().paused);
        broker.unpause_queue("critical").await.unwrap();
        assert!(!broker.queue_stats("critical").await.unwrap().paused);
    }

    #[tokio::test]
    async fn run_task_revives_dead_task_keeping_retry_count() {
        let (broker, _) = broker();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new().max_retry(1))
            .await
            .unwrap();
        let worker = WorkerId::generate();
        let leased = broker.dequeue(&worker).await.unwrap().unwrap();
        let id = leased.task_id();
        broker.retry(id, "first", None).await.unwrap();
        broker.run_task(id).await.unwrap();
        broker.dequeue(&worker).await.unwrap().unwrap();
        broker.retry(id, "second", None).await.unwrap();
        assert_eq!(broker.list_dead("default").await.unwrap().len(), 1);

        broker.run_task(id).await.unwrap();
        let info = broker.get_task(id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.task.retried(), 1);
        assert_eq!(broker.queue_stats("default").await.unwrap().dead, 0);
    }

    #[tokio::test]
    async fn run_task_on_scheduled_skips_the_wait() {
        let (broker, _) = broker();
        let id = broker
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::new().process_in(Duration::from_secs(3_600)),
            )
            .await
            .unwrap();
        broker.run_task(id).await.unwrap();
        assert_eq!(broker.list_pending("default").await.unwrap().len(), 1);
        assert!(broker.list_scheduled("default").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_task_releases_uniqueness() {
        let (broker, _) = broker();
        let window = Duration::from_secs(60);
        let id = broker
            .enqueue("t", json!({}), EnqueueOptions::new().unique_key("k", window))
            .await
            .unwrap();
        broker.delete_task(id).await.unwrap();
        assert!(broker.get_task(id).await.unwrap().is_none());
        assert_eq!(broker.store().key_count().await, 1); // only the queue registry set

        broker
            .enqueue("t", json!({}), EnqueueOptions::new().unique_key("k", window))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn active_task_cannot_be_deleted() {
        let (broker, _) = broker();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let leased = broker
            .dequeue(&WorkerId::generate())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            broker.delete_task(leased.task_id()).await,
            Err(BrokerError::TaskNotFound(_))
        ));
    }

    async fn dead_with_key(broker: &Broker<crate::impls::MemoryStore>, key: &str) -> TaskId {
        let id = broker
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::new()
                    .max_retry(0)
                    .unique_key(key, Duration::from_secs(3_600)),
            )
            .await
            .unwrap();
        broker.dequeue(&WorkerId::generate()).await.unwrap().unwrap();
        broker.retry(id, "fatal", None).await.unwrap();
        id
    }

    #[tokio::test]
    async fn revived_dead_task_holds_its_unique_key_again() {
        let (broker, _) = broker();
        let id = dead_with_key(&broker, "k").await;

        broker.run_task(id).await.unwrap();
        let again = EnqueueOptions::new().unique_key("k", Duration::from_secs(60));
        match broker.enqueue("t", json!({}), again).await {
            Err(BrokerError::DuplicateTask { existing, .. }) => assert_eq!(existing, id),
            other => panic!("expected DuplicateTask, got {other:?}"),
        }
        assert_eq!(broker.list_pending("default").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revive_is_refused_while_another_task_holds_the_key() {
        let (broker, _) = broker();
        let dead = dead_with_key(&broker, "k").await;
        let holder = broker
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::new().unique_key("k", Duration::from_secs(60)),
            )
            .await
            .unwrap();

        match broker.run_task(dead).await {
            Err(BrokerError::DuplicateTask { existing, .. }) => assert_eq!(existing, holder),
            other => panic!("expected DuplicateTask, got {other:?}"),
        }
        let info = broker.get_task(dead).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Dead);
    }
}
