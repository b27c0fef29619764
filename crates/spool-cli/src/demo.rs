//! Demo workload: producers enqueue `hello` tasks, workers run them through Poller and Heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use spool_core::Broker;
use spool_core::app::{Heartbeat, Poller};
use spool_core::domain::{EnqueueOptions, TaskMessage, WorkerId};
use spool_core::ports::StateStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const TASK_TYPE: &str = "hello";

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
    #[serde(default)]
    poison: bool,
}

/// Fails the first `n` executions, and every execution of a poison payload.
pub struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    pub fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }

    pub async fn execute(&self, msg: &TaskMessage) -> Result<(), String> {
        let p: HelloPayload = serde_json::from_value(msg.payload().clone())
            .map_err(|e| format!("json decode: {e}"))?;

        if p.poison {
            return Err(format!("poison payload for {}", p.name));
        }
        let left = self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if let Ok(left) = left {
            return Err(format!("intentional failure (left={left})"));
        }

        info!(task_id = %msg.id(), retried = msg.retried(), "Hello, {}!", p.name);
        Ok(())
    }
}

/// Every tenth task is poison and ends up dead. Every third goes to `critical`.
pub async fn produce<S: StateStore>(broker: &Broker<S>, count: usize) -> anyhow::Result<()> {
    for i in 0..count {
        let mut options = EnqueueOptions::new();
        if i % 3 == 0 {
            options = options.queue("critical");
        }
        if i % 5 == 4 {
            options = options.process_in(Duration::from_millis(500));
        }
        let poison = i % 10 == 9;
        if poison {
            options = options.max_retry(2);
        }
        let id = broker
            .enqueue(
                TASK_TYPE,
                json!({ "name": format!("spool-{i}"), "poison": poison }),
                options,
            )
            .await?;
        debug!(task_id = %id, "enqueued");
    }
    Ok(())
}

/// Runs until shutdown is requested.
pub async fn worker_loop<S: StateStore>(
    broker: Broker<S>,
    handler: Arc<HelloHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poller = Poller::new(broker.clone(), WorkerId::generate());
    let worker = *poller.worker();
    loop {
        // 1) lease を 1 件取る（Pending -> Active）
        let leased = match poller.next(&mut shutdown).await {
            Ok(Some(leased)) => leased,
            Ok(None) => break,
            Err(e) => {
                warn!(worker = %worker, error = %e, "dequeue failed");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };
        let task_id = leased.task_id();

        // 2) heartbeat を張ったまま handler を実行
        let heartbeat = Heartbeat::start(broker.clone(), task_id, worker);
        let result = handler.execute(&leased.task).await;
        if heartbeat.stop().await {
            // 回収済みなので報告しても TaskNotFound になる
            warn!(task_id = %task_id, "lease lost; dropping result");
            continue;
        }

        // 3) 結果を報告（失敗: Retry か Dead は broker 側）
        let reported = match result {
            Ok(()) => broker.done(task_id).await,
            Err(e) => broker.retry(task_id, e, None).await.map(|outcome| {
                info!(task_id = %task_id, ?outcome, "task failed");
            }),
        };
        if let Err(e) = reported {
            warn!(task_id = %task_id, error = %e, "could not report result");
        }
    }
    debug!(worker = %worker, "worker stopped");
}

/// Processed plus dead across all queues.
pub async fn settled<S: StateStore>(broker: &Broker<S>) -> anyhow::Result<usize> {
    let mut n = 0;
    for q in broker.queues().await? {
        let stats = broker.queue_stats(&q).await?;
        n += stats.processed as usize + stats.dead;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use spool_core::domain::{TaskId, TaskType};

    fn msg(payload: serde_json::Value) -> TaskMessage {
        TaskMessage::new(
            TaskId::generate(),
            TaskType::new(TASK_TYPE),
            payload,
            "default",
            3,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn fails_the_configured_number_of_times() {
        let h = HelloHandler::new(2);
        let m = msg(json!({ "name": "a" }));
        assert!(h.execute(&m).await.is_err());
        assert!(h.execute(&m).await.is_err());
        assert!(h.execute(&m).await.is_ok());
    }

    #[tokio::test]
    async fn poison_always_fails() {
        let h = HelloHandler::new(0);
        let m = msg(json!({ "name": "a", "poison": true }));
        assert!(h.execute(&m).await.is_err());
        assert!(h.execute(&m).await.is_err());
    }
}
