use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use futures::FutureExt;
use tokio::time;

use super::checker::{Evaluation, TimeoutChecker};
use crate::storage::{run_blocking, StorageError};

/// Counts from one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub not_due: usize,
    pub recovered: usize,
    pub notified: usize,
    pub race_lost: usize,
    pub errors: usize,
}

/// Periodic sweep over all open triggers.
///
/// Catches triggers whose deadline timer never ran, e.g. because the process
/// restarted between ingestion and the deadline.
pub struct SweepWorker {
    checker: Arc<TimeoutChecker>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl SweepWorker {
    pub fn new(checker: Arc<TimeoutChecker>, interval: Duration) -> Self {
        Self {
            checker,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                interval = ?self.interval,
                timeout = ?self.checker.timeout(),
                "Sweep worker started"
            );

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the first scan waits one interval
            interval.tick().await;

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }

                let now = self.checker.now();
                match AssertUnwindSafe(self.run_cycle(now)).catch_unwind().await {
                    Ok(Ok(stats)) => {
                        if stats.scanned > 0 {
                            tracing::info!(?stats, "Sweep cycle finished");
                        }
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "Sweep cycle failed"),
                    Err(_) => tracing::error!("Sweep cycle panicked"),
                }
            }

            tracing::info!("Sweep worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Evaluate every open trigger once at `now`.
    ///
    /// Fails only if the open-trigger snapshot cannot be read; errors on
    /// individual records are logged and counted.
    pub async fn run_cycle(&self, now: DateTime<FixedOffset>) -> Result<SweepStats, StorageError> {
        let open = run_blocking(self.checker.store(), |store| store.list_open_triggers()).await?;
        let mut stats = SweepStats {
            scanned: open.len(),
            ..Default::default()
        };

        tracing::debug!(open = open.len(), now = %now, "Sweeping open triggers");

        for alert in &open {
            match self.checker.evaluate(alert, now, "sweep").await {
                Ok(Evaluation::NotDue) => stats.not_due += 1,
                Ok(Evaluation::Recovered { .. }) => stats.recovered += 1,
                Ok(Evaluation::Notified) => stats.notified += 1,
                Ok(Evaluation::RaceLost) => stats.race_lost += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(alert_id = alert.id, error = %e, "Sweep check failed");
                }
            }
        }

        Ok(stats)
    }
}
