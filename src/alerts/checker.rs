//! Deadline evaluation shared by the per-alert timer and the periodic sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};

use super::model::{now_in, Alert, DeadlineWindow};
use super::notifier::TimeoutNotifier;
use crate::storage::{run_blocking, AlertStore, StorageError};

/// Outcome of evaluating one open trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The deadline window has not closed yet
    NotDue,
    /// A recovery arrived inside the window
    Recovered { recovery_id: i64 },
    /// This call won the compare-and-set and dispatched the notification
    Notified,
    /// Another path already notified or the trigger was resolved meanwhile
    RaceLost,
}

/// Decides whether an open trigger timed out and fires its notification.
///
/// The deadline timer and the periodic sweep share one instance, so both use
/// the same window and the same recovery-check/compare-and-set/dispatch
/// sequence.
pub struct TimeoutChecker {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn TimeoutNotifier>,
    timeout: Duration,
    tz: FixedOffset,
}

impl TimeoutChecker {
    pub fn new(
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn TimeoutNotifier>,
        timeout: Duration,
        tz: FixedOffset,
    ) -> Self {
        Self {
            store,
            notifier,
            timeout,
            tz,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        now_in(&self.tz)
    }

    pub fn window(&self, alert: &Alert) -> DeadlineWindow {
        DeadlineWindow::for_trigger(alert.occurred_at, self.timeout)
    }

    /// Evaluate an open trigger at `now`, skipping it while its window is
    /// still open. Used by the periodic sweep.
    pub async fn evaluate(
        &self,
        alert: &Alert,
        now: DateTime<FixedOffset>,
        source: &'static str,
    ) -> Result<Evaluation, StorageError> {
        let window = self.window(alert);

        if !window.is_due(now) {
            tracing::debug!(
                source,
                alert_id = alert.id,
                window_end = %window.end,
                now = %now,
                "Deadline window still open, not due"
            );
            return Ok(Evaluation::NotDue);
        }

        self.conclude(alert, &window, source).await
    }

    /// Recovery lookup, compare-and-set, dispatch.
    ///
    /// The notification is sent only by the caller whose compare-and-set
    /// succeeded; a failed dispatch does not undo `notified`.
    async fn conclude(
        &self,
        alert: &Alert,
        window: &DeadlineWindow,
        source: &'static str,
    ) -> Result<Evaluation, StorageError> {
        let key = alert.correlation_key();
        let recovery = {
            let (key, window) = (key.clone(), *window);
            run_blocking(&self.store, move |store| {
                store.find_recovery_in_window(&key, &window)
            })
            .await?
        };
        if let Some(recovery) = recovery {
            tracing::info!(
                source,
                alert_id = alert.id,
                recovery_id = recovery.id,
                recovered_at = %recovery.occurred_at,
                key = %key,
                "Recovery found inside deadline window"
            );
            return Ok(Evaluation::Recovered {
                recovery_id: recovery.id,
            });
        }

        let id = alert.id;
        if !run_blocking(&self.store, move |store| store.try_mark_notified(id)).await? {
            tracing::info!(
                source,
                alert_id = alert.id,
                key = %key,
                "Trigger already notified or resolved, race lost"
            );
            return Ok(Evaluation::RaceLost);
        }

        tracing::warn!(
            source,
            alert_id = alert.id,
            key = %key,
            occurred_at = %alert.occurred_at,
            window_end = %window.end,
            "Trigger timed out without recovery, notifying"
        );
        self.notifier.dispatch(alert).await;

        Ok(Evaluation::Notified)
    }

    /// Re-check a trigger by id once its timer fires.
    ///
    /// Returns `None` when the record is gone or no longer open.
    pub async fn check_alert(&self, id: i64) -> Result<Option<Evaluation>, StorageError> {
        let open = run_blocking(&self.store, move |store| store.find_open_trigger(id)).await?;
        let Some(alert) = open else {
            tracing::info!(alert_id = id, "Trigger no longer open, skipping deadline check");
            return Ok(None);
        };

        let window = self.window(&alert);
        self.conclude(&alert, &window, "timer").await.map(Some)
    }

    /// Arm the per-alert deadline timer.
    ///
    /// The task sleeps for the configured timeout and then re-checks the
    /// trigger. There is no cancellation; a trigger resolved in the meantime
    /// is skipped when the timer wakes.
    pub fn arm(self: &Arc<Self>, id: i64) -> tokio::task::JoinHandle<()> {
        let checker = Arc::clone(self);
        tracing::info!(alert_id = id, timeout = ?self.timeout, "Deadline timer armed");

        tokio::spawn(async move {
            tokio::time::sleep(checker.timeout).await;

            match checker.check_alert(id).await {
                Ok(Some(outcome)) => {
                    tracing::debug!(alert_id = id, ?outcome, "Deadline timer finished")
                }
                Ok(None) => {}
                Err(e) => tracing::error!(
                    alert_id = id,
                    error = %e,
                    "Deadline check failed, leaving it to the periodic sweep"
                ),
            }
        })
    }
}
