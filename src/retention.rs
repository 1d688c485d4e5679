//! Daily retention sweep
//!
//! Once a day the reaper deletes the previous day's records. Records from the
//! last few minutes before midnight are kept while they are still open, so a
//! trigger that arrived just before the cutoff stays visible to its deadline
//! timer and to the periodic sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};

use crate::alerts::model::{now_in, AlertKind};
use crate::storage::{AlertStore, StorageError};

/// Retention schedule
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Wall-clock time of day the reaper runs
    pub run_at: NaiveTime,
    /// Open records younger than `cutoff - grace` survive the run
    pub grace: Duration,
    /// Back-off after a failed run
    pub retry_after: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            run_at: NaiveTime::from_hms_opt(0, 0, 5).unwrap_or_default(),
            grace: Duration::from_secs(25 * 60),
            retry_after: Duration::from_secs(3600),
        }
    }
}

/// Summary of one reaper run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Deleted because they were older than the grace window
    pub deleted_expired: usize,
    /// Deleted from inside the grace window because they were resolved or notified
    pub deleted_settled: usize,
    /// Open records inside the grace window left in place
    pub kept_open: usize,
    pub kept_triggers: usize,
    pub kept_recoveries: usize,
}

impl RetentionReport {
    pub fn deleted(&self) -> usize {
        self.deleted_expired + self.deleted_settled
    }
}

/// Midnight of the day containing `now`, in `now`'s offset
pub fn start_of_day(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let midnight = now.date_naive().and_time(NaiveTime::default());
    now.timezone()
        .from_local_datetime(&midnight)
        .single()
        .unwrap_or(now)
}

/// Next occurrence of `run_at` strictly after `now`
pub fn next_run_after(now: DateTime<FixedOffset>, run_at: NaiveTime) -> DateTime<FixedOffset> {
    let today = now.date_naive().and_time(run_at);
    let candidate = now
        .timezone()
        .from_local_datetime(&today)
        .single()
        .unwrap_or(now);

    if candidate <= now {
        candidate + chrono::Duration::days(1)
    } else {
        candidate
    }
}

/// Daily retention worker
///
/// Each run executes on the blocking pool; a failed or panicking run is
/// logged and followed by a `retry_after` back-off.
pub struct RetentionReaper {
    store: Arc<dyn AlertStore>,
    config: RetentionConfig,
    tz: FixedOffset,
    running: Arc<AtomicBool>,
}

impl RetentionReaper {
    pub fn new(store: Arc<dyn AlertStore>, config: RetentionConfig, tz: FixedOffset) -> Self {
        Self {
            store,
            config,
            tz,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(run_at = %self.config.run_at, "Retention reaper started");

            while self.running.load(Ordering::SeqCst) {
                let now = now_in(&self.tz);
                let next = next_run_after(now, self.config.run_at);
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::info!(next_run = %next, wait_secs = wait.as_secs(), "Retention run scheduled");

                tokio::time::sleep(wait).await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }

                let reaper = Arc::clone(&self);
                let outcome =
                    tokio::task::spawn_blocking(move || reaper.run_once(now_in(&reaper.tz))).await;
                let failed = match outcome {
                    Ok(Ok(_)) => false,
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Retention run failed");
                        true
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Retention run panicked");
                        true
                    }
                };

                if failed {
                    tracing::info!(
                        retry_secs = self.config.retry_after.as_secs(),
                        "Retention reaper backing off"
                    );
                    tokio::time::sleep(self.config.retry_after).await;
                }
            }

            tracing::info!("Retention reaper stopped");
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

    /// Apply the retention policy with the start of `now`'s day as cutoff.
    ///
    /// Everything before `cutoff - grace` is deleted. Inside
    /// `[cutoff - grace, cutoff)` only resolved or notified records go.
    pub fn run_once(&self, now: DateTime<FixedOffset>) -> Result<RetentionReport, StorageError> {
        let cutoff = start_of_day(now.with_timezone(&self.tz));
        let grace_start = chrono::Duration::from_std(self.config.grace)
            .ok()
            .and_then(|grace| cutoff.checked_sub_signed(grace));
        let Some(grace_start) = grace_start else {
            tracing::warn!(
                grace = ?self.config.grace,
                cutoff = %cutoff,
                "Grace window reaches past the earliest representable time, nothing expired"
            );
            return Ok(RetentionReport::default());
        };

        tracing::info!(
            now = %now,
            cutoff = %cutoff,
            grace_start = %grace_start,
            "Retention run starting"
        );

        let deleted_expired = self.store.delete_older_than(grace_start)?;
        let deleted_settled = self
            .store
            .delete_resolved_or_notified_in_range(grace_start, cutoff)?;
        let kept = self.store.list_unsettled_in_range(grace_start, cutoff)?;

        let report = RetentionReport {
            deleted_expired,
            deleted_settled,
            kept_open: kept.len(),
            kept_triggers: kept.iter().filter(|a| a.kind == AlertKind::Trigger).count(),
            kept_recoveries: kept.iter().filter(|a| a.kind == AlertKind::Recovery).count(),
        };

        for alert in &kept {
            tracing::info!(
                alert_id = alert.id,
                kind = %alert.kind,
                occurred_at = %alert.occurred_at,
                entity = %alert.entity_name,
                alert_key = %alert.alert_key,
                "Kept open record across retention cutoff"
            );
        }

        tracing::info!(
            deleted = report.deleted(),
            deleted_expired,
            deleted_settled,
            kept_open = report.kept_open,
            "Retention run finished"
        );

        Ok(report)
    }
}
