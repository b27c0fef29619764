//! Heartbeat - 実行中の task の lease を定期的に延長する
//!
//! worker は handler 実行中に Heartbeat を持ち、終わったら `stop()` します。
//! 延長に失敗した（lease が切れた／他の worker に移った）場合は `lost()` で分かります。
//! その時点で task は Recoverer に回収済みなので、結果を報告しても `TaskNotFound` になります。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::broker::Broker;
use crate::domain::{TaskId, WorkerId};
use crate::ports::StateStore;

pub struct Heartbeat {
    stop_tx: watch::Sender<bool>,
    lost: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts renewing the lease on `task_id` every `heartbeat_interval_ms`.
    pub fn start<S: StateStore>(broker: Broker<S>, task_id: TaskId, worker: WorkerId) -> Self {
        let interval = broker.config().heartbeat_interval();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => return,
                }
                if let Err(e) = broker.renew_lease(task_id, &worker).await {
                    if e.is_retryable() {
                        warn!(task_id = %task_id, error = %e, "lease renewal failed; will retry");
                        continue;
                    }
                    warn!(task_id = %task_id, error = %e, "lease lost");
                    flag.store(true, Ordering::SeqCst);
                    return;
                }
            }
        });

        Self {
            stop_tx,
            lost,
            join,
        }
    }

    /// Did a renewal fail for good?
    pub fn lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stops renewing and waits for the background task.
    pub async fn stop(self) -> bool {
        // ignore send error: the task may have exited on its own
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
        self.lost.load(Ordering::SeqCst)
    }
}
