//! Async driver for the timer lanes.
//!
//! The lifecycle manager is lane-agnostic; something still has to call
//! [`LifecycleManager::tick`] on an interval and
//! [`LifecycleManager::midnight_pass`] at each boundary. [`EngineRunner`]
//! is that something for tokio embedders: it owns the manager behind an
//! async mutex so the embedding application can share it with its own
//! command handlers.
//!
//! Lane failures are logged and never stop the loop; a failed save stays
//! dirty inside the manager and the next lane entry retries it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::lifecycle::LifecycleManager;
use crate::storage::Persistence;

/// Drives the periodic scan and the midnight pass on a tokio runtime.
pub struct EngineRunner<P: Persistence> {
    manager: Arc<Mutex<LifecycleManager<P>>>,
    scan_interval: StdDuration,
}

impl<P: Persistence + 'static> EngineRunner<P> {
    /// Wrap a manager; the scan cadence comes from its configuration.
    pub fn new(manager: LifecycleManager<P>) -> Self {
        let scan_interval = StdDuration::from_secs(manager.config().scan_interval_secs.max(1));
        Self {
            manager: Arc::new(Mutex::new(manager)),
            scan_interval,
        }
    }

    /// Shared handle to the manager, for the embedding application's own
    /// claim/approve/admin entry points.
    pub fn manager(&self) -> Arc<Mutex<LifecycleManager<P>>> {
        Arc::clone(&self.manager)
    }

    /// Run both timer lanes until the task is aborted.
    ///
    /// The periodic scan skips missed ticks instead of bursting after a
    /// suspend; the midnight pass re-arms from the wall clock each time,
    /// so a laptop waking at 09:00 runs the boundary pass once, not once
    /// per missed night.
    pub async fn run(self) {
        let mut scan = tokio::time::interval(self.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut boundary = next_midnight(Utc::now());

        loop {
            let until_boundary = (boundary - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::ZERO);

            tokio::select! {
                _ = scan.tick() => {
                    let now = Utc::now();
                    debug!("periodic scan tick");
                    let mut manager = self.manager.lock().await;
                    if let Err(err) = manager.tick(now) {
                        warn!(error = %err, "periodic scan reported an error");
                    }
                }
                _ = tokio::time::sleep(until_boundary) => {
                    let now = Utc::now();
                    debug!(boundary = %boundary, "midnight boundary pass");
                    {
                        let mut manager = self.manager.lock().await;
                        if let Err(err) = manager.midnight_pass(now) {
                            warn!(error = %err, "midnight pass reported an error");
                        }
                    }
                    boundary = next_midnight(now);
                }
            }
        }
    }
}

/// The next UTC midnight strictly after `now`.
fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let next_day = now.date_naive() + chrono::Duration::days(1);
    next_day.and_time(NaiveTime::MIN).and_utc()
}
