//! Task state: which of the five per-queue structures currently holds a task.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Active -> (removed)                      done
/// - Pending -> Active -> Retry -> Pending               retry with backoff
/// - Pending -> Active -> Dead                           retry budget exhausted / kill
/// - Active -> Pending                                   lease expired (orphan recovery)
/// - Scheduled -> Pending                                process_at reached
/// - Scheduled | Retry | Pending -> Dead                 kill
///
/// A task is in exactly one state at a time; the state is stored next to the record and always
/// matches the structure that holds the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Ready to run immediately.
    Pending,

    /// Leased to a worker.
    Active,

    /// Waiting for a client-requested process time.
    Scheduled,

    /// Waiting for a policy-computed retry time.
    Retry,

    /// Retry budget exhausted or killed; kept for inspection until retention evicts it.
    Dead,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Pending,
        TaskState::Active,
        TaskState::Scheduled,
        TaskState::Retry,
        TaskState::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Active => "active",
            TaskState::Scheduled => "scheduled",
            TaskState::Retry => "retry",
            TaskState::Dead => "dead",
        }
    }

    /// Live tasks can still run; they are the ones that hold uniqueness locks.
    pub fn is_live(self) -> bool {
        !matches!(self, TaskState::Dead)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown task state {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskState::Pending)]
    #[case::active(TaskState::Active)]
    #[case::scheduled(TaskState::Scheduled)]
    #[case::retry(TaskState::Retry)]
    #[case::dead(TaskState::Dead)]
    fn parses_its_own_name(#[case] state: TaskState) {
        assert_eq!(state.as_str().parse::<TaskState>(), Ok(state));
    }

    #[test]
    fn only_dead_is_not_live() {
        let live: Vec<_> = TaskState::ALL.into_iter().filter(|s| s.is_live()).collect();
        assert_eq!(live.len(), 4);
        assert!(!TaskState::Dead.is_live());
    }
}
