//! Keyspace layout.
//!
//! The key names are a durable contract shared by every process pointing at the same store:
//!
//! ```text
//! <p>:queues                 set     queues that ever received a task
//! <p>:paused                 set     paused queues
//! <p>:tasks                  hash    task id -> queue
//! <p>:<q>:pending            list    task ids, FIFO
//! <p>:<q>:active             zset    task id scored by lease expiry (unix ms)
//! <p>:<q>:scheduled          zset    task id scored by process-at
//! <p>:<q>:retry              zset    task id scored by retry-at
//! <p>:<q>:dead               zset    task id scored by time of death
//! <p>:<q>:t:<id>             hash    msg, state
//! <p>:<q>:lease:<id>         hash    worker, expires_at
//! <p>:<q>:unique:<key>       string  id of the lock holder (TTL)
//! <p>:<q>:processed|failed|orphaned  counters
//! ```

use crate::domain::TaskId;
use crate::queue::TaskState;

pub const FIELD_MSG: &str = "msg";
pub const FIELD_STATE: &str = "state";
pub const FIELD_WORKER: &str = "worker";
pub const FIELD_EXPIRES_AT: &str = "expires_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn all_queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    pub fn paused(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    pub fn task_index(&self) -> String {
        format!("{}:tasks", self.prefix)
    }

    /// The structure holding ids of tasks in `state`.
    pub fn structure(&self, queue: &str, state: TaskState) -> String {
        format!("{}:{}:{}", self.prefix, queue, state.as_str())
    }

    pub fn pending(&self, queue: &str) -> String {
        self.structure(queue, TaskState::Pending)
    }

    pub fn active(&self, queue: &str) -> String {
        self.structure(queue, TaskState::Active)
    }

    pub fn scheduled(&self, queue: &str) -> String {
        self.structure(queue, TaskState::Scheduled)
    }

    pub fn retry(&self, queue: &str) -> String {
        self.structure(queue, TaskState::Retry)
    }

    pub fn dead(&self, queue: &str) -> String {
        self.structure(queue, TaskState::Dead)
    }

    pub fn task(&self, queue: &str, id: &TaskId) -> String {
        format!("{}:{}:t:{}", self.prefix, queue, id)
    }

    pub fn lease(&self, queue: &str, id: &TaskId) -> String {
        format!("{}:{}:lease:{}", self.prefix, queue, id)
    }

    pub fn unique(&self, queue: &str, key: &str) -> String {
        format!("{}:{}:unique:{}", self.prefix, queue, key)
    }

    pub fn processed(&self, queue: &str) -> String {
        format!("{}:{}:processed", self.prefix, queue)
    }

    pub fn failed(&self, queue: &str) -> String {
        format!("{}:{}:failed", self.prefix, queue)
    }

    pub fn orphaned(&self, queue: &str) -> String {
        format!("{}:{}:orphaned", self.prefix, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskState::Pending, "spool:default:pending")]
    #[case(TaskState::Active, "spool:default:active")]
    #[case(TaskState::Scheduled, "spool:default:scheduled")]
    #[case(TaskState::Retry, "spool:default:retry")]
    #[case(TaskState::Dead, "spool:default:dead")]
    fn structure_keys_follow_layout(#[case] state: TaskState, #[case] expected: &str) {
        assert_eq!(Keys::new("spool").structure("default", state), expected);
    }

    #[test]
    fn per_task_keys_embed_display_id() {
        let keys = Keys::new("p");
        let id: TaskId = "task-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
        assert_eq!(keys.task("q", &id), "p:q:t:task-01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(
            keys.lease("q", &id),
            "p:q:lease:task-01ARZ3NDEKTSV4RRFFQ69G5FAV"
        );
        assert_eq!(keys.unique("q", "k"), "p:q:unique:k");
        assert_eq!(keys.task_index(), "p:tasks");
    }
}
