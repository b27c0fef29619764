//! MemoryStore - 単一プロセス用の StateStore
//!
//! # 実装詳細
//! - keyspace 全体を 1 つの `tokio::sync::Mutex` で保護し、`atomically()` の closure は
//!   lock を握ったまま実行する（= transaction の直列化）
//! - TTL は lazy expiry: 読み書きのたびに期限切れの key を見えなくする
//! - `set_offline(true)` で障害を注入できる（以降の transaction は `Unavailable`）
//!
//! # 使用例
//! ```ignore
//! let store = MemoryStore::new(Arc::new(SystemClock));
//! let len = store.atomically(|tx| tx.rpush("q", "a")).await?;
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::ports::{Clock, StateStore, StoreError, StoreResult, SystemClock, Transaction};

pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates losing the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live keys. Test helper.
    pub async fn key_count(&self) -> usize {
        let now = self.clock.now();
        let keyspace = self.keyspace.lock().await;
        keyspace
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn atomically<T, E, F>(&self, script: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()).into());
        }
        let mut keyspace = self.keyspace.lock().await;
        let mut tx = MemoryTx {
            keyspace: &mut keyspace,
            now: self.clock.now(),
        };
        script(&mut tx)
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

enum Value {
    Str(String),
    List(VecDeque<String>),
    ZSet(ZSet),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::ZSet(z) => z.scores.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }
}

#[derive(Default)]
struct ZSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl ZSet {
    fn insert(&mut self, score: i64, member: &str) -> bool {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
        previous.is_none()
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

struct MemoryTx<'a> {
    keyspace: &'a mut Keyspace,
    now: DateTime<Utc>,
}

impl MemoryTx<'_> {
    fn live(&self, key: &str) -> Option<&Value> {
        self.keyspace
            .entries
            .get(key)
            .filter(|e| !e.is_expired(self.now))
            .map(|e| &e.value)
    }

    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .keyspace
            .entries
            .get(key)
            .is_some_and(|e| e.is_expired(self.now));
        if expired {
            self.keyspace.entries.remove(key);
        }
    }

    /// Mutable access, creating the key with `init` when missing.
    fn live_mut(&mut self, key: &str, init: fn() -> Value) -> &mut Value {
        self.purge_expired(key);
        &mut self
            .keyspace
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: init(),
                expires_at: None,
            })
            .value
    }

    /// Removes a collection key once it holds nothing.
    fn drop_if_empty(&mut self, key: &str) {
        if self
            .keyspace
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty())
        {
            self.keyspace.entries.remove(key);
        }
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
        }
    }

    fn list(&self, key: &str) -> StoreResult<Option<&VecDeque<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(Some(l)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> StoreResult<&mut VecDeque<String>> {
        match self.live_mut(key, || Value::List(VecDeque::new())) {
            Value::List(l) => Ok(l),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn zset(&self, key: &str) -> StoreResult<Option<&ZSet>> {
        match self.live(key) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> StoreResult<&mut ZSet> {
        match self.live_mut(key, || Value::ZSet(ZSet::default())) {
            Value::ZSet(z) => Ok(z),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn hash(&self, key: &str) -> StoreResult<Option<&HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str) -> StoreResult<&mut HashMap<String, String>> {
        match self.live_mut(key, || Value::Hash(HashMap::new())) {
            Value::Hash(h) => Ok(h),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn set_of(&self, key: &str) -> StoreResult<Option<&BTreeSet<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn set_mut(&mut self, key: &str) -> StoreResult<&mut BTreeSet<String>> {
        match self.live_mut(key, || Value::Set(BTreeSet::new())) {
            Value::Set(s) => Ok(s),
            _ => Err(Self::wrong_type(key)),
        }
    }

    /// Runs a mutation on a collection, then drops the key if the collection ended up empty.
    ///
    /// A failed type check never leaves a freshly created empty key behind.
    fn mutate<R>(
        &mut self,
        key: &str,
        op: impl FnOnce(&mut Self) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let result = op(self);
        self.drop_if_empty(key);
        result
    }
}

impl Transaction for MemoryTx<'_> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn set(
        &mut self,
        key: &str,
        value: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        self.purge_expired(key);
        let entry = self
            .keyspace
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::Str("0".to_string()),
                expires_at: None,
            });
        let Value::Str(raw) = &mut entry.value else {
            return Err(Self::wrong_type(key));
        };
        let current: i64 = raw.parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("not an integer: {raw:?}"),
        })?;
        let next = current.saturating_add(delta);
        *raw = next.to_string();
        Ok(next)
    }

    fn del(&mut self, key: &str) -> StoreResult<bool> {
        self.purge_expired(key);
        Ok(self.keyspace.entries.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live(key).is_some())
    }

    fn rpush(&mut self, key: &str, value: &str) -> StoreResult<usize> {
        self.mutate(key, |tx| {
            let list = tx.list_mut(key)?;
            list.push_back(value.to_string());
            Ok(list.len())
        })
    }

    fn lpush(&mut self, key: &str, value: &str) -> StoreResult<usize> {
        self.mutate(key, |tx| {
            let list = tx.list_mut(key)?;
            list.push_front(value.to_string());
            Ok(list.len())
        })
    }

    fn lpop(&mut self, key: &str) -> StoreResult<Option<String>> {
        if self.list(key)?.is_none() {
            return Ok(None);
        }
        self.mutate(key, |tx| Ok(tx.list_mut(key)?.pop_front()))
    }

    fn lfront(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.list(key)?.and_then(|l| l.front().cloned()))
    }

    fn lrem(&mut self, key: &str, value: &str) -> StoreResult<usize> {
        if self.list(key)?.is_none() {
            return Ok(0);
        }
        self.mutate(key, |tx| {
            let list = tx.list_mut(key)?;
            let before = list.len();
            list.retain(|v| v != value);
            Ok(before - list.len())
        })
    }

    fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .list(key)?
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn llen(&self, key: &str) -> StoreResult<usize> {
        Ok(self.list(key)?.map_or(0, VecDeque::len))
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) -> StoreResult<bool> {
        self.mutate(key, |tx| Ok(tx.zset_mut(key)?.insert(score, member)))
    }

    fn zrem(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        if self.zset(key)?.is_none() {
            return Ok(false);
        }
        self.mutate(key, |tx| Ok(tx.zset_mut(key)?.remove(member)))
    }

    fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        Ok(self
            .zset(key)?
            .and_then(|z| z.scores.get(member).copied()))
    }

    fn zrange_by_score(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> StoreResult<Vec<(String, i64)>> {
        let Some(zset) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        Ok(zset
            .ordered
            .iter()
            .take_while(|(score, _)| *score <= max)
            .take(limit)
            .map(|(score, member)| (member.clone(), *score))
            .collect())
    }

    fn zrange(&self, key: &str) -> StoreResult<Vec<(String, i64)>> {
        Ok(self
            .zset(key)?
            .map(|z| {
                z.ordered
                    .iter()
                    .map(|(score, member)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn zcard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.zset(key)?.map_or(0, |z| z.scores.len()))
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.mutate(key, |tx| {
            tx.hash_mut(key)?
                .insert(field.to_string(), value.to_string());
            Ok(())
        })
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.hash(key)?.cloned().unwrap_or_default())
    }

    fn hdel(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        if self.hash(key)?.is_none() {
            return Ok(false);
        }
        self.mutate(key, |tx| Ok(tx.hash_mut(key)?.remove(field).is_some()))
    }

    fn sadd(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        self.mutate(key, |tx| Ok(tx.set_mut(key)?.insert(member.to_string())))
    }

    fn srem(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        if self.set_of(key)?.is_none() {
            return Ok(false);
        }
        self.mutate(key, |tx| Ok(tx.set_mut(key)?.remove(member)))
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.set_of(key)?.is_some_and(|s| s.contains(member)))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .set_of(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
