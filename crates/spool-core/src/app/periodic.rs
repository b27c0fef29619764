//! Shared driver for the periodic background loops.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::BrokerResult;

/// Runs `tick` every `interval` until `shutdown` flips to true (or its sender is dropped).
///
/// Shutdown is only observed while waiting, so a tick in progress always runs to the end.
/// A failed tick is logged and the loop keeps going.
pub(crate) async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<usize>>,
{
    info!(loop_name = name, interval_ms = interval.as_millis() as u64, "loop started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }
        if let Err(e) = tick().await {
            warn!(loop_name = name, error = %e, "loop iteration failed");
        }
    }
    info!(loop_name = name, "loop stopped");
}
