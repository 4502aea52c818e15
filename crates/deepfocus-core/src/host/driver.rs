//! Real-time tick source for a [`LocalHost`].

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use super::LocalHost;

/// Emit a tick every `period` and dispatch the host's queue until `stop` says so.
///
/// Scheduling jitter is harmless: timers recompute from the wall clock on
/// every tick. Returns the number of ticks emitted.
pub async fn run_ticks<F>(host: &LocalHost, period: Duration, mut stop: F) -> u64
where
    F: FnMut() -> bool,
{
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    host.dispatch_pending();
    let mut ticks = 0;
    while !stop() {
        interval.tick().await;
        host.tick();
        host.dispatch_pending();
        ticks += 1;
    }
    tracing::debug!(ticks, "tick driver stopped");
    ticks
}
