//! Janitor - Dead の retention を適用する定期ループ
//!
//! Kill / retry 枯渇のたびに broker も trim しますが、Dead に新しい task が入らない queue でも
//! age 上限を効かせるためにこのループがあります。

use std::time::Duration;

use tokio::sync::watch;

use crate::app::periodic::run_periodic;
use crate::broker::Broker;
use crate::error::BrokerResult;
use crate::ports::StateStore;

pub struct Janitor<S> {
    broker: Broker<S>,
    interval: Duration,
}

impl<S: StateStore> Janitor<S> {
    pub fn new(broker: Broker<S>) -> Self {
        let interval = Duration::from_millis(broker.config().janitor.interval_ms);
        Self { broker, interval }
    }

    pub async fn tick(&self) -> BrokerResult<usize> {
        let mut evicted = 0;
        for queue in self.broker.queues().await? {
            evicted += self.broker.trim_dead(&queue).await?;
        }
        Ok(evicted)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_periodic("janitor", self.interval, shutdown, || self.tick()).await;
    }
}
