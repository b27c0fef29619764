//! Recoverer - lease 期限切れの Active task を回収する定期ループ
//!
//! worker が crash すると heartbeat が止まり lease が切れます。Recoverer はそれを
//! Pending の先頭に戻します（retry 回数はそのまま、orphaned カウンタだけ増える）。
//!
//! 放置された lease は最長で lease_duration + recoverer interval で回収されます。

use std::time::Duration;

use tokio::sync::watch;

use crate::app::periodic::run_periodic;
use crate::broker::Broker;
use crate::error::BrokerResult;
use crate::ports::StateStore;

pub struct Recoverer<S> {
    broker: Broker<S>,
    interval: Duration,
}

impl<S: StateStore> Recoverer<S> {
    pub fn new(broker: Broker<S>) -> Self {
        let interval = Duration::from_millis(broker.config().recoverer.interval_ms);
        Self { broker, interval }
    }

    /// One scan over every queue. Returns how many tasks were recovered.
    pub async fn tick(&self) -> BrokerResult<usize> {
        let mut recovered = 0;
        for queue in self.broker.queues().await? {
            recovered += self.broker.recover_expired(&queue).await?.len();
        }
        Ok(recovered)
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        run_periodic("recoverer", self.interval, shutdown, || self.tick()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::broker;
    use crate::domain::{EnqueueOptions, WorkerId};
    use serde_json::json;

    #[tokio::test]
    async fn tick_recovers_abandoned_leases() {
        let (broker, clock) = broker();
        broker
            .enqueue("t", json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        broker.dequeue(&WorkerId::generate()).await.unwrap().unwrap();

        let recoverer = Recoverer::new(broker.clone());
        assert_eq!(recoverer.tick().await.unwrap(), 0);

        clock.advance(broker.config().lease_duration());
        assert_eq!(recoverer.tick().await.unwrap(), 1);
        assert_eq!(broker.list_pending("default").await.unwrap().len(), 1);
    }
}
