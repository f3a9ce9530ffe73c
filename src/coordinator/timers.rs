use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::Coordinator;

/// Fixed poll cadence for the pending-request reconciliation.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Client-side countdown resolution.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// The coordinator's two scheduled tasks, owned together and cancelable as a
/// unit so neither can outlive a teardown.
pub struct TimerSet {
    poll: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl TimerSet {
    pub fn abort_all(&self) {
        self.poll.abort();
        self.countdown.abort();
    }
}

/// Spawn the poll and countdown loops. Each tick re-checks the online /
/// active-trip guards itself, so the pair runs for the coordinator's whole
/// lifetime and gating never races a cancellation.
pub fn spawn_timers(coordinator: Arc<Coordinator>) -> TimerSet {
    let poll_coordinator = coordinator.clone();
    let poll = tokio::spawn(async move {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            poll_coordinator.poll_tick().await;
        }
    });

    let countdown = tokio::spawn(async move {
        let mut interval = tokio::time::interval(COUNTDOWN_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            coordinator.countdown_tick().await;
        }
    });

    info!("poll and countdown timers started");

    TimerSet { poll, countdown }
}
