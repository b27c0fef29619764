//! Services - 定期ループ（Forwarder / Recoverer / Janitor）をまとめて起動・停止する
//!
//! shutdown は watch channel 1 本で配る。worker 側の Poller も同じ channel を購読できる。

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::{Forwarder, Janitor, Recoverer};
use crate::broker::Broker;
use crate::ports::StateStore;

/// Background services handle.
/// - `spawn()` で Forwarder / Recoverer / Janitor を起動する
/// - `subscribe()` の receiver を Poller に渡すと同じ shutdown で止まる
/// - `shutdown_and_join()` で全ループの終了を待てる（各ループは実行中の scan を終えてから止まる）
pub struct Services {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Services {
    pub fn spawn<S: StateStore>(broker: &Broker<S>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = vec![
            tokio::spawn(Forwarder::new(broker.clone()).run(shutdown_rx.clone())),
            tokio::spawn(Recoverer::new(broker.clone()).run(shutdown_rx.clone())),
            tokio::spawn(Janitor::new(broker.clone()).run(shutdown_rx)),
        ];

        Self { shutdown_tx, joins }
    }

    /// A receiver that flips to `true` on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all loops.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}
