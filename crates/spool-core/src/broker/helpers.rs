//! Helpers shared by the broker submodules. Everything here runs inside one transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::DeadRetention;
use crate::domain::{Lease, TaskId, TaskMessage, WorkerId};
use crate::error::{BrokerError, BrokerResult};
use crate::keys::{FIELD_EXPIRES_AT, FIELD_MSG, FIELD_STATE, FIELD_WORKER, Keys};
use crate::ports::{StoreError, Transaction};
use crate::queue::TaskState;

/// Scores are unix milliseconds.
pub(crate) fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_score(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// `at + d`, saturating at the end of representable time.
pub(crate) fn after(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn corrupt(key: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn parse_id(key: &str, raw: &str) -> Result<TaskId, StoreError> {
    raw.parse().map_err(|e| corrupt(key, e))
}

/// A task record together with where it currently lives.
pub(crate) struct Located {
    pub queue: String,
    pub msg: TaskMessage,
    pub state: TaskState,
}

/// Reads the record of `id` in `queue`, if any.
pub(crate) fn load(
    tx: &dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
) -> Result<Option<(TaskMessage, TaskState)>, StoreError> {
    let key = keys.task(queue, id);
    let record = tx.hgetall(&key)?;
    if record.is_empty() {
        return Ok(None);
    }
    let msg = record
        .get(FIELD_MSG)
        .ok_or_else(|| corrupt(&key, "missing msg"))?;
    let msg = TaskMessage::from_json(msg).map_err(|e| corrupt(&key, e))?;
    let state = record
        .get(FIELD_STATE)
        .ok_or_else(|| corrupt(&key, "missing state"))?;
    let state = state.parse().map_err(|e: String| corrupt(&key, e))?;
    Ok(Some((msg, state)))
}

/// Finds a task through the id index. `TaskNotFound` if it is gone.
pub(crate) fn locate(tx: &dyn Transaction, keys: &Keys, id: &TaskId) -> BrokerResult<Located> {
    let Some(queue) = tx.hget(&keys.task_index(), &id.to_string())? else {
        return Err(BrokerError::TaskNotFound(*id));
    };
    let Some((msg, state)) = load(tx, keys, &queue, id)? else {
        return Err(BrokerError::TaskNotFound(*id));
    };
    Ok(Located { queue, msg, state })
}

pub(crate) fn write_record(
    tx: &mut dyn Transaction,
    keys: &Keys,
    msg: &TaskMessage,
    state: TaskState,
) -> Result<(), StoreError> {
    let key = keys.task(msg.queue(), &msg.id());
    let json = msg.to_json().map_err(|e| corrupt(&key, e))?;
    tx.hset(&key, FIELD_MSG, &json)?;
    tx.hset(&key, FIELD_STATE, state.as_str())
}

pub(crate) fn set_state(
    tx: &mut dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
    state: TaskState,
) -> Result<(), StoreError> {
    tx.hset(&keys.task(queue, id), FIELD_STATE, state.as_str())
}

/// Takes the id out of the structure for `state`. Active also drops the lease record.
pub(crate) fn detach(
    tx: &mut dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
    state: TaskState,
) -> Result<bool, StoreError> {
    let member = id.to_string();
    let key = keys.structure(queue, state);
    match state {
        TaskState::Pending => Ok(tx.lrem(&key, &member)? > 0),
        TaskState::Active => {
            tx.del(&keys.lease(queue, id))?;
            tx.zrem(&key, &member)
        }
        TaskState::Scheduled | TaskState::Retry | TaskState::Dead => tx.zrem(&key, &member),
    }
}

/// Removes every trace of a task except its structure membership.
pub(crate) fn purge(
    tx: &mut dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
) -> Result<(), StoreError> {
    tx.del(&keys.task(queue, id))?;
    tx.del(&keys.lease(queue, id))?;
    tx.hdel(&keys.task_index(), &id.to_string())?;
    Ok(())
}

/// Drops the uniqueness lock if `msg` still holds it.
pub(crate) fn release_unique(
    tx: &mut dyn Transaction,
    keys: &Keys,
    msg: &TaskMessage,
) -> Result<(), StoreError> {
    let Some(unique) = msg.unique_key() else {
        return Ok(());
    };
    let lock = keys.unique(msg.queue(), unique);
    if tx.get(&lock)?.as_deref() == Some(msg.id().to_string().as_str()) {
        tx.del(&lock)?;
    }
    Ok(())
}

/// The task holding `lock_key`, if the lock is open and that task is still live.
pub(crate) fn live_holder(
    tx: &dyn Transaction,
    keys: &Keys,
    queue: &str,
    lock_key: &str,
) -> Result<Option<TaskId>, StoreError> {
    let Some(raw) = tx.get(lock_key)? else {
        return Ok(None);
    };
    let holder = parse_id(lock_key, &raw)?;
    Ok(load(tx, keys, queue, &holder)?
        .filter(|(_, state)| state.is_live())
        .map(|_| holder))
}

pub(crate) fn write_lease(
    tx: &mut dyn Transaction,
    keys: &Keys,
    queue: &str,
    lease: &Lease,
) -> Result<(), StoreError> {
    let key = keys.lease(queue, &lease.task_id);
    tx.hset(&key, FIELD_WORKER, &lease.worker.to_string())?;
    tx.hset(&key, FIELD_EXPIRES_AT, &lease.expires_at.to_rfc3339())?;
    tx.zadd(
        &keys.active(queue),
        score(lease.expires_at),
        &lease.task_id.to_string(),
    )?;
    Ok(())
}

pub(crate) fn read_lease(
    tx: &dyn Transaction,
    keys: &Keys,
    queue: &str,
    id: &TaskId,
) -> Result<Option<Lease>, StoreError> {
    let key = keys.lease(queue, id);
    let record = tx.hgetall(&key)?;
    if record.is_empty() {
        return Ok(None);
    }
    let worker: WorkerId = record
        .get(FIELD_WORKER)
        .ok_or_else(|| corrupt(&key, "missing worker"))?
        .parse()
        .map_err(|e| corrupt(&key, e))?;
    let expires_at = record
        .get(FIELD_EXPIRES_AT)
        .ok_or_else(|| corrupt(&key, "missing expires_at"))?;
    let expires_at = DateTime::parse_from_rfc3339(expires_at)
        .map_err(|e| corrupt(&key, e))?
        .with_timezone(&Utc);
    Ok(Some(Lease {
        task_id: *id,
        worker,
        expires_at,
    }))
}

pub(crate) fn read_counter(tx: &dyn Transaction, key: &str) -> Result<u64, StoreError> {
    match tx.get(key)? {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| corrupt(key, format!("not a counter: {raw:?}"))),
    }
}

/// Evicts Dead entries past the age cap, then the oldest entries beyond the count cap.
pub(crate) fn trim_dead_in(
    tx: &mut dyn Transaction,
    keys: &Keys,
    queue: &str,
    now: DateTime<Utc>,
    retention: &DeadRetention,
) -> Result<usize, StoreError> {
    let dead = keys.dead(queue);
    let mut evicted = Vec::new();

    if retention.max_age_secs > 0 {
        let max_age_ms =
            i64::try_from(retention.max_age_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let cutoff = score(now).saturating_sub(max_age_ms);
        // strictly older than the cutoff
        for (member, _) in tx.zrange_by_score(&dead, cutoff.saturating_sub(1), usize::MAX)? {
            evicted.push(member);
        }
    }
    if retention.max_count > 0 {
        let remaining = tx.zcard(&dead)?.saturating_sub(evicted.len());
        if remaining > retention.max_count {
            let excess = remaining - retention.max_count;
            let extra: Vec<String> = tx
                .zrange(&dead)?
                .into_iter()
                .map(|(member, _)| member)
                .filter(|member| !evicted.contains(member))
                .take(excess)
                .collect();
            evicted.extend(extra);
        }
    }

    for member in &evicted {
        tx.zrem(&dead, member)?;
        let id = parse_id(&dead, member)?;
        purge(tx, keys, queue, &id)?;
    }
    Ok(evicted.len())
}
