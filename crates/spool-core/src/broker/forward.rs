//! Forwarding: due Scheduled and Retry entries move to Pending.

use tracing::debug;

use crate::broker::Broker;
use crate::broker::helpers::{parse_id, score, set_state};
use crate::error::BrokerResult;
use crate::ports::StateStore;
use crate::queue::TaskState;

impl<S: StateStore> Broker<S> {
    /// Moves every due entry of `queue`'s Scheduled and Retry structures to the tail of Pending.
    ///
    /// Works in batches of `forwarder.batch_size`, one transaction per batch. Each entry is moved
    /// by the transaction that removes it, so concurrent forwarders never move an entry twice.
    /// Returns how many tasks were forwarded.
    pub async fn forward_due(&self, queue: &str) -> BrokerResult<usize> {
        let batch_size = self.inner.config.forwarder.batch_size;
        let keys = &self.inner.keys;
        let mut total = 0;

        loop {
            let now = self.now();
            let moved = self
                .inner
                .store
                .atomically(|tx| -> BrokerResult<usize> {
                    let mut moved = 0;
                    for state in [TaskState::Scheduled, TaskState::Retry] {
                        let from = keys.structure(queue, state);
                        let due = tx.zrange_by_score(&from, score(now), batch_size - moved)?;
                        for (member, _) in due {
                            if !tx.zrem(&from, &member)? {
                                continue;
                            }
                            tx.rpush(&keys.pending(queue), &member)?;
                            let id = parse_id(&from, &member)?;
                            set_state(tx, keys, queue, &id, TaskState::Pending)?;
                            moved += 1;
                        }
                        if moved == batch_size {
                            break;
                        }
                    }
                    Ok(moved)
                })
                .await?;

            total += moved;
            if moved < batch_size {
                break;
            }
        }

        if total > 0 {
            debug!(queue = %queue, forwarded = total, "forwarded due tasks");
        }
        Ok(total)
    }
}
