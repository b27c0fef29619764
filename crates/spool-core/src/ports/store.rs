//! StateStore port - 共有 key-value store と atomic transaction
//!
//! StateStore はすべての queue 構造（pending/active/scheduled/retry/dead）、task record、
//! lease、uniqueness lock を保持する正本（source of truth）です。
//!
//! # 設計原則
//! - broker の操作は 1 回の `atomically()` = 1 transaction
//! - transaction の中身は同期 closure（Redis の Lua script と同じ形）。closure 実行中は
//!   他の caller の操作が割り込まない
//! - closure は「先に検証、後で変更」の順で書く。途中で Err を返しても巻き戻しはしない
//! - compare-and-swap か multi-key transaction を持つ store なら何でも実装できる
//!
//! # データ型
//! string（TTL 付き）、list、sorted set（i64 score）、hash、set。
//! 空になった collection の key は消える。型の違う key を触ると `StoreError::WrongType`。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Failures of the store itself, as opposed to broker-level rejections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Connectivity loss, timeout, or the store refusing work. Transient.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("key {key} holds a value of another type")]
    WrongType { key: String },

    /// A stored value could not be decoded.
    #[error("corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations available inside one atomic transaction.
///
/// Member / value strings are opaque to the store.
pub trait Transaction {
    // ---- strings ----
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `expires_at = None` keeps the value forever.
    fn set(&mut self, key: &str, value: &str, expires_at: Option<DateTime<Utc>>)
    -> StoreResult<()>;

    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Deletes a key of any type. Returns whether it existed.
    fn del(&mut self, key: &str) -> StoreResult<bool>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    // ---- lists ----
    fn rpush(&mut self, key: &str, value: &str) -> StoreResult<usize>;
    fn lpush(&mut self, key: &str, value: &str) -> StoreResult<usize>;
    fn lpop(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Head of the list without removing it.
    fn lfront(&self, key: &str) -> StoreResult<Option<String>>;

    /// Removes every occurrence of `value`. Returns how many were removed.
    fn lrem(&mut self, key: &str, value: &str) -> StoreResult<usize>;

    fn lrange(&self, key: &str) -> StoreResult<Vec<String>>;
    fn llen(&self, key: &str) -> StoreResult<usize>;

    // ---- sorted sets ----
    /// Inserts or re-scores. Returns true if the member is new.
    fn zadd(&mut self, key: &str, score: i64, member: &str) -> StoreResult<bool>;
    fn zrem(&mut self, key: &str, member: &str) -> StoreResult<bool>;
    fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with `score <= max`, lowest score first, at most `limit`.
    fn zrange_by_score(&self, key: &str, max: i64, limit: usize)
    -> StoreResult<Vec<(String, i64)>>;

    /// Every member, lowest score first.
    fn zrange(&self, key: &str) -> StoreResult<Vec<(String, i64)>>;
    fn zcard(&self, key: &str) -> StoreResult<usize>;

    // ---- hashes ----
    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;
    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool>;

    // ---- sets ----
    fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool>;
    fn srem(&mut self, key: &str, member: &str) -> StoreResult<bool>;
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Sorted for deterministic iteration.
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
}

/// The atomic transaction interface the broker depends on.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Runs `script` as one indivisible transaction.
    ///
    /// The closure's own error type only needs to absorb `StoreError`, so broker-level rejections
    /// (`TaskNotFound`, ...) pass straight through.
    async fn atomically<T, E, F>(&self, script: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send;
}
