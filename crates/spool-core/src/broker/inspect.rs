//! Read-only inspection of queues and tasks.

use chrono::{DateTime, Utc};

use crate::broker::helpers::{from_score, load, locate, parse_id, read_counter, read_lease};
use crate::broker::{Broker, QueueStats, TaskInfo};
use crate::domain::{Leased, TaskId};
use crate::error::{BrokerError, BrokerResult};
use crate::keys::Keys;
use crate::ports::{StateStore, StoreError, Transaction};
use crate::queue::TaskState;

impl<S: StateStore> Broker<S> {
    /// Every queue that has ever received a task, sorted by name.
    pub async fn queues(&self) -> BrokerResult<Vec<String>> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<Vec<String>> { Ok(tx.smembers(&keys.all_queues())?) })
            .await
    }

    pub async fn queue_stats(&self, queue: &str) -> BrokerResult<QueueStats> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<QueueStats> {
                Ok(QueueStats {
                    queue: queue.to_string(),
                    paused: tx.sismember(&keys.paused(), queue)?,
                    pending: tx.llen(&keys.pending(queue))?,
                    active: tx.zcard(&keys.active(queue))?,
                    scheduled: tx.zcard(&keys.scheduled(queue))?,
                    retry: tx.zcard(&keys.retry(queue))?,
                    dead: tx.zcard(&keys.dead(queue))?,
                    processed: read_counter(tx, &keys.processed(queue))?,
                    failed: read_counter(tx, &keys.failed(queue))?,
                    orphaned: read_counter(tx, &keys.orphaned(queue))?,
                })
            })
            .await
    }

    /// Pending tasks in dequeue order.
    pub async fn list_pending(&self, queue: &str) -> BrokerResult<Vec<TaskInfo>> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<Vec<TaskInfo>> {
                let pending = keys.pending(queue);
                let mut out = Vec::new();
                for raw in tx.lrange(&pending)? {
                    let id = parse_id(&pending, &raw)?;
                    out.push(info(tx, keys, queue, &id, None)?);
                }
                Ok(out)
            })
            .await
    }

    /// Active tasks with their leases, soonest expiry first.
    pub async fn list_active(&self, queue: &str) -> BrokerResult<Vec<Leased>> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<Vec<Leased>> {
                let active = keys.active(queue);
                let mut out = Vec::new();
                for (member, _) in tx.zrange(&active)? {
                    let id = parse_id(&active, &member)?;
                    let Some((task, _)) = load(tx, keys, queue, &id)? else {
                        continue;
                    };
                    let Some(lease) = read_lease(tx, keys, queue, &id)? else {
                        continue;
                    };
                    out.push(Leased { task, lease });
                }
                Ok(out)
            })
            .await
    }

    /// Scheduled tasks, earliest process time first. `TaskInfo::at` is the process time.
    pub async fn list_scheduled(&self, queue: &str) -> BrokerResult<Vec<TaskInfo>> {
        self.list_sorted(queue, TaskState::Scheduled).await
    }

    /// Retry tasks, earliest retry time first. `TaskInfo::at` is the retry time.
    pub async fn list_retry(&self, queue: &str) -> BrokerResult<Vec<TaskInfo>> {
        self.list_sorted(queue, TaskState::Retry).await
    }

    /// Dead tasks, oldest first. `TaskInfo::at` is the time of death.
    pub async fn list_dead(&self, queue: &str) -> BrokerResult<Vec<TaskInfo>> {
        self.list_sorted(queue, TaskState::Dead).await
    }

    /// Looks a task up by id. `None` once it is done, deleted or evicted.
    pub async fn get_task(&self, id: TaskId) -> BrokerResult<Option<TaskInfo>> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<Option<TaskInfo>> {
                let found = match locate(tx, keys, &id) {
                    Ok(found) => found,
                    Err(BrokerError::TaskNotFound(_)) => return Ok(None),
                    Err(e) => return Err(e),
                };
                let at = match found.state {
                    TaskState::Pending => None,
                    state => tx
                        .zscore(&keys.structure(&found.queue, state), &id.to_string())?
                        .and_then(from_score),
                };
                Ok(Some(TaskInfo {
                    task: found.msg,
                    state: found.state,
                    at,
                }))
            })
            .await
    }

    async fn list_sorted(&self, queue: &str, state: TaskState) -> BrokerResult<Vec<TaskInfo>> {
        let keys = &self.inner.keys;
        self.inner
            .store
            .atomically(|tx| -> BrokerResult<Vec<TaskInfo>> {
                let key = keys.structure(queue, state);
                let mut out = Vec::new();
                for (member, score) in tx.zrange(&key)? {
                    let id = parse_id(&key, &member)?;
                    out.push(info(tx, keys, queue, &id, from_score(score))?);
                }
                Ok(out)
            })
            .await
    }
}

fn info(
    tx: &dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
    at: Option<DateTime<Utc>>,
) -> Result<TaskInfo, StoreError> {
    let Some((task, state)) = load(tx, keys, queue, id)? else {
        return Err(StoreError::Corrupt {
            key: keys.task(queue, id),
            reason: "listed id without record".to_string(),
        });
    };
    Ok(TaskInfo { task, state, at })
}
