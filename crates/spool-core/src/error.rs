//! Errors - broker / config のエラー型と分類
//!
//! # 分類
//! - Validation: enqueue 時の入力不正。何も変更されていない
//! - Stale: caller の見ている状態が古い（TaskNotFound / LeaseNotOwned / LeaseExpired）
//! - Duplicate: uniqueness lock による意図した拒否
//! - Transient: store の障害。broker 自身は retry しない

use thiserror::Error;

use crate::domain::{TaskId, WorkerId};
use crate::ports::StoreError;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Stale,
    Duplicate,
    Transient,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    /// Another live task already holds the uniqueness key.
    #[error("duplicate task: key {key} is held by {existing}")]
    DuplicateTask { key: String, existing: TaskId },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("lease on {task_id} is held by {holder}")]
    LeaseNotOwned { task_id: TaskId, holder: WorkerId },

    #[error("lease on {0} has expired")]
    LeaseExpired(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Validation(_) => ErrorKind::Validation,
            BrokerError::DuplicateTask { .. } => ErrorKind::Duplicate,
            BrokerError::TaskNotFound(_)
            | BrokerError::LeaseNotOwned { .. }
            | BrokerError::LeaseExpired(_) => ErrorKind::Stale,
            BrokerError::Store(_) => ErrorKind::Transient,
        }
    }

    /// Only store failures are worth retrying; everything else reflects a decision.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Rejections raised before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task type must not be empty")]
    EmptyTaskType,

    #[error("invalid queue name {0:?}")]
    InvalidQueueName(String),

    #[error("queue {0:?} is not configured")]
    UnknownQueue(String),

    #[error("payload must be a JSON object or null")]
    PayloadNotObject,

    #[error("deadline is already in the past")]
    DeadlineInPast,

    #[error("uniqueness window must be positive")]
    ZeroUniqueWindow,

    #[error("uniqueness key must not be empty")]
    EmptyUniqueKey,

    #[error("timeout must be positive")]
    ZeroTimeout,

    #[error("process_at and process_in are mutually exclusive")]
    ConflictingSchedule,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Queue names become key segments, so they are restricted to a safe alphabet.
pub(crate) fn validate_queue_name(name: &str) -> Result<(), ValidationError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidQueueName(name.to_string()))
    }
}
