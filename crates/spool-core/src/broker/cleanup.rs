//! Dead-letter retention.

use tracing::info;

use crate::broker::Broker;
use crate::broker::helpers::trim_dead_in;
use crate::error::BrokerResult;
use crate::ports::StateStore;

impl<S: StateStore> Broker<S> {
    /// Evicts Dead entries of `queue` older than `dead.max_age_secs`, then the oldest entries
    /// beyond `dead.max_count`. Returns how many were evicted.
    pub async fn trim_dead(&self, queue: &str) -> BrokerResult<usize> {
        let now = self.now();
        let keys = &self.inner.keys;
        let retention = &self.inner.config.dead;

        let evicted = self
            .inner
            .store
            .atomically(|tx| -> BrokerResult<usize> {
                Ok(trim_dead_in(tx, keys, queue, now, retention)?)
            })
            .await?;
        if evicted > 0 {
            info!(queue = %queue, evicted, "trimmed dead tasks");
        }
        Ok(evicted)
    }
}
