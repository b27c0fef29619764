//! Task record: the unit of work as it is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::TaskId;

/// String tag identifying the handler for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The stored form of a task.
///
/// Design:
/// - identity (`id`, `task_type`, `payload`, `queue`) is fixed at creation; there are getters only.
/// - lifecycle metadata (`retried`, `orphaned`, last error) changes through `pub(crate)` methods,
///   called from inside broker transactions.
/// - queue structures hold the id only; this record lives in its own hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    id: TaskId,
    #[serde(rename = "type")]
    task_type: TaskType,
    payload: serde_json::Value,
    queue: String,

    /// Handler-driven failures so far.
    retried: u32,
    max_retry: u32,

    /// Times the task was reclaimed from a dead worker. Never counts against `max_retry`.
    #[serde(default)]
    orphaned: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unique_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_failed_at: Option<DateTime<Utc>>,

    enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: serde_json::Value,
        queue: impl Into<String>,
        max_retry: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            queue: queue.into(),
            retried: 0,
            max_retry,
            orphaned: 0,
            timeout_secs: None,
            deadline: None,
            unique_key: None,
            error_msg: None,
            last_failed_at: None,
            enqueued_at,
        }
    }

    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_unique_key(mut self, key: Option<String>) -> Self {
        self.unique_key = key;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn retried(&self) -> u32 {
        self.retried
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn orphaned(&self) -> u32 {
        self.orphaned
    }

    /// Advisory execution timeout; enforced by the worker harness, not the broker.
    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout_secs
    }

    /// Advisory absolute deadline; enforced by the worker harness, not the broker.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn unique_key(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    pub fn last_failed_at(&self) -> Option<DateTime<Utc>> {
        self.last_failed_at
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Has the retry budget been used up?
    pub fn retry_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }

    pub(crate) fn record_failure(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.error_msg = Some(error.into());
        self.last_failed_at = Some(at);
    }

    pub(crate) fn increment_retried(&mut self) {
        self.retried = self.retried.saturating_add(1);
    }

    pub(crate) fn increment_orphaned(&mut self) {
        self.orphaned = self.orphaned.saturating_add(1);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn sample() -> TaskMessage {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TaskMessage::new(
            TaskId::generate(),
            TaskType::new("email.send"),
            json!({"to": "a@example.com", "tags": ["x", {"nested": [1, 2.5, null]}]}),
            "default",
            3,
            at,
        )
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let mut msg = sample()
            .with_timeout_secs(Some(30))
            .with_deadline(Some(at))
            .with_unique_key(Some("k".to_string()));
        msg.increment_retried();
        msg.increment_orphaned();
        msg.record_failure("boom", at);

        let back = TaskMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[rstest]
    #[case(1.0715660391465826e-75)]
    #[case(-1.81996730402717e-179)]
    #[case(-1.603964615428183e143)]
    #[case(0.1 + 0.2)]
    #[case(f64::MIN_POSITIVE)]
    #[case(f64::MAX)]
    fn roundtrip_keeps_payload_floats_exact(#[case] f: f64) {
        let msg = sample();
        let msg = TaskMessage::new(
            msg.id(),
            msg.task_type().clone(),
            json!({"f": f, "deep": [{"g": -f}]}),
            "default",
            3,
            msg.enqueued_at(),
        );

        let back = TaskMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back.payload()["f"].as_f64(), Some(f));
        assert_eq!(back, msg);
    }

    #[test]
    fn json_shape_uses_type_key_and_prefixed_id() {
        let msg = sample();
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "email.send");
        assert!(v["id"].as_str().unwrap().starts_with("task-"));
        assert!(v.get("deadline").is_none());
    }

    #[test]
    fn retry_exhausted_compares_against_max_retry() {
        let mut msg = sample();
        assert!(!msg.retry_exhausted());
        for _ in 0..3 {
            msg.increment_retried();
        }
        assert!(msg.retry_exhausted());
    }
}
