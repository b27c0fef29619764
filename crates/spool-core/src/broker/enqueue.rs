//! Enqueue: validation, uniqueness, and placement into Pending or Scheduled.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::broker::Broker;
use crate::broker::helpers::{after, live_holder, score, write_record};
use crate::domain::{EnqueueOptions, TaskId, TaskMessage, TaskType, Uniqueness};
use crate::error::{BrokerError, BrokerResult, ValidationError, validate_queue_name};
use crate::ports::StateStore;
use crate::queue::TaskState;

/// Whole seconds, rounding any fraction up.
fn ceil_secs(d: Duration) -> u64 {
    d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0))
}

/// Lock key derived from the task itself: type plus the SHA-256 of the canonical payload JSON.
///
/// `serde_json::Value` keeps object keys sorted, so equal payloads give equal keys.
pub fn derived_unique_key(task_type: &TaskType, payload: &Value) -> String {
    let digest = Sha256::digest(payload.to_string().as_bytes());
    format!("{}:{:x}", task_type, digest)
}

struct UniqueLock {
    key: String,
    lock_key: String,
    expires_at: DateTime<Utc>,
}

impl<S: StateStore> Broker<S> {
    /// Submits a task and returns its id.
    ///
    /// Validation runs before anything is written. With uniqueness requested, enqueue fails with
    /// `DuplicateTask` while another live task holds the key and the lock window is open.
    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: Value,
        options: EnqueueOptions,
    ) -> BrokerResult<TaskId> {
        let task_type = task_type.into();
        let now = self.now();
        let config = &self.inner.config;
        let keys = &self.inner.keys;

        if task_type.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyTaskType.into());
        }
        if !(payload.is_object() || payload.is_null()) {
            return Err(ValidationError::PayloadNotObject.into());
        }
        let queue = match options.queue {
            Some(q) => q,
            None => config
                .default_queue()
                .map(str::to_string)
                .ok_or_else(|| ValidationError::UnknownQueue(String::new()))?,
        };
        validate_queue_name(&queue)?;
        if !config.queues.contains_key(&queue) {
            return Err(ValidationError::UnknownQueue(queue).into());
        }
        if options.process_at.is_some() && options.process_in.is_some() {
            return Err(ValidationError::ConflictingSchedule.into());
        }
        if options.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ValidationError::ZeroTimeout.into());
        }
        if options.deadline.is_some_and(|d| d <= now) {
            return Err(ValidationError::DeadlineInPast.into());
        }
        if let Some(Some(window)) = options.uniqueness.window()
            && window.is_zero()
        {
            return Err(ValidationError::ZeroUniqueWindow.into());
        }
        if let Uniqueness::Key { key, .. } = &options.uniqueness
            && key.is_empty()
        {
            return Err(ValidationError::EmptyUniqueKey.into());
        }

        let unique = match &options.uniqueness {
            Uniqueness::None => None,
            Uniqueness::Derived { window } => Some((
                derived_unique_key(&task_type, &payload),
                window.unwrap_or(config.unique_window()),
            )),
            Uniqueness::Key { key, window } => {
                Some((key.clone(), window.unwrap_or(config.unique_window())))
            }
        }
        .map(|(key, window)| UniqueLock {
            lock_key: keys.unique(&queue, &key),
            key,
            expires_at: after(now, window),
        });

        let timeout_secs = match (options.timeout, options.deadline) {
            (Some(t), _) => Some(ceil_secs(t).max(1)),
            (None, Some(_)) => None,
            (None, None) => Some(config.default_timeout_secs).filter(|s| *s > 0),
        };
        let process_at = options
            .process_at
            .or_else(|| options.process_in.map(|d| after(now, d)))
            .filter(|at| *at > now);

        let id = self.inner.ids.generate_task_id();
        let max_retry = options.max_retry.unwrap_or(config.default_max_retry);
        let msg = TaskMessage::new(id, task_type, payload, queue.clone(), max_retry, now)
            .with_timeout_secs(timeout_secs)
            .with_deadline(options.deadline)
            .with_unique_key(unique.as_ref().map(|u| u.key.clone()));

        self.inner
            .store
            .atomically(|tx| -> BrokerResult<()> {
                if let Some(lock) = &unique {
                    if let Some(existing) = live_holder(tx, keys, &queue, &lock.lock_key)? {
                        return Err(BrokerError::DuplicateTask {
                            key: lock.key.clone(),
                            existing,
                        });
                    }
                    tx.set(&lock.lock_key, &id.to_string(), Some(lock.expires_at))?;
                }

                tx.sadd(&keys.all_queues(), &queue)?;
                tx.hset(&keys.task_index(), &id.to_string(), &queue)?;
                match process_at {
                    Some(at) => {
                        write_record(tx, keys, &msg, TaskState::Scheduled)?;
                        tx.zadd(&keys.scheduled(&queue), score(at), &id.to_string())?;
                    }
                    None => {
                        write_record(tx, keys, &msg, TaskState::Pending)?;
                        tx.rpush(&keys.pending(&queue), &id.to_string())?;
                    }
                }
                Ok(())
            })
            .await?;

        debug!(task_id = %id, queue = %queue, scheduled = process_at.is_some(), "enqueued");
        Ok(id)
    }
}
