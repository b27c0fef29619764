//! Forwarder - due になった Scheduled/Retry を Pending へ移す定期ループ
//!
//! # フロー
//! 1. `interval_ms` ごとに store に登録済みの queue を列挙
//! 2. queue ごとに `Broker::forward_due()`
//!
//! 移動そのものは broker の transaction なので、Forwarder を複数プロセスで動かしても
//! 同じ task が二重に forward されることはありません。

use std::time::Duration;

use tokio::sync::watch;

use crate::app::periodic::run_periodic;
use crate::broker::Broker;
use crate::error::BrokerResult;
use crate::ports::StateStore;

pub struct Forwarder<S> {
    broker: Broker<S>,
    interval: Duration,
}

impl<S: StateStore> Forwarder<S> {
    pub fn new(broker: Broker<S>) -> Self {
        let interval = Duration::from_millis(broker.config().forwarder.interval_ms);
        Self { broker, interval }
    }

    /// One scan over every queue. Returns how many tasks were forwarded.
    pub async fn tick(&self) -> BrokerResult<usize> {
        let mut forwarded = 0;
        for queue in self.broker.queues().await? {
            forwarded += self.broker.forward_due(&queue).await?;
        }
        Ok(forwarded)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_periodic("forwarder", self.interval, shutdown, || self.tick()).await;
    }
}
