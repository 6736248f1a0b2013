//! Announcement timer.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;

use crate::discovery::Shared;
use crate::pending::PendingWork;
use crate::unicast;

pub(crate) async fn run(shared: Arc<Shared>) {
    let period = shared.settings.announcement_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                let queued = scan(&shared, Instant::now());
                if queued > 0 {
                    tracing::debug!(queued, "reachability probes queued");
                }
            }
        }
    }
}

/// Queue a reachability probe for every registry silent past the
/// threshold as of `now`. Returns how many were queued.
pub(crate) fn scan(shared: &Arc<Shared>, now: Instant) -> usize {
    let threshold = shared.settings.silence_threshold();
    shared
        .table
        .silent(threshold, now)
        .into_iter()
        .filter(|&service_id| unicast::dispatch(shared, PendingWork::Reachability { service_id }))
        .count()
}
