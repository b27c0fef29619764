//! Poller - Dequeue を待てる形にする協調的ポーリング
//!
//! `Broker::dequeue` は non-blocking です。Poller は空振りのたびに待ち時間を倍にしながら
//! （`poll.min_backoff_ms` から `poll.max_backoff_ms` まで）再試行します。
//!
//! # キャンセル
//! shutdown は dequeue の合間（sleep 中）にしか見ません。dequeue が成功した task を
//! 捨てることはありません。

use std::time::Duration;

use tokio::sync::watch;

use crate::broker::Broker;
use crate::domain::{Leased, WorkerId};
use crate::error::BrokerResult;
use crate::ports::StateStore;

pub struct Poller<S> {
    broker: Broker<S>,
    worker: WorkerId,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl<S: StateStore> Poller<S> {
    pub fn new(broker: Broker<S>, worker: WorkerId) -> Self {
        let poll = &broker.config().poll;
        let min_backoff = Duration::from_millis(poll.min_backoff_ms);
        let max_backoff = Duration::from_millis(poll.max_backoff_ms);
        Self {
            broker,
            worker,
            min_backoff,
            max_backoff,
        }
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Waits until a task is leased. `Ok(None)` once shutdown is requested.
    ///
    /// Store errors are returned to the caller, which decides whether to keep polling.
    pub async fn next(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BrokerResult<Option<Leased>> {
        let mut backoff = self.min_backoff;
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            if let Some(leased) = self.broker.dequeue(&self.worker).await? {
                return Ok(Some(leased));
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}
