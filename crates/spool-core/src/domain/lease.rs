//! Lease: a time-bounded claim by a worker on an active task.
//!
//! Lease は task の所有権ではなく、(task_id → worker, expires_at) の単なる対応表です。
//! worker が死んでも task 自体は壊れず、lease が古くなるだけで Recoverer が回収します。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskMessage, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub worker: WorkerId,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a successful dequeue: the task plus the lease granted on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Leased {
    pub task: TaskMessage,
    pub lease: Lease,
}

impl Leased {
    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }
}
