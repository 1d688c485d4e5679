//! Alert ingestion
//!
//! Turns an incoming event into a stored record, then either arms the
//! deadline timer (trigger) or resolves matching open triggers (recovery).

pub mod parser;

pub use parser::{parse_timestamp, ParsedPayload, PayloadParser};

use std::sync::Arc;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::alerts::model::{now_in, Alert, AlertKind, NewAlert};
use crate::alerts::TimeoutChecker;
use crate::storage::{run_blocking, StorageError};

/// An event as delivered by the upstream workflow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertRequest {
    /// Free-text alert message
    pub input: String,
    pub entity_name: String,
    /// `YYYY-MM-DD HH:MM:SS` in the reference timezone
    pub time: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub template_name: String,
    /// "trigger" / "recovery" (or the Chinese template labels)
    pub kind: String,
    pub alert_key: String,
}

/// Result of ingesting one event
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    #[serde(flatten)]
    pub alert: Alert,
    /// Open triggers resolved by this recovery
    pub resolved_triggers: usize,
}

pub struct Ingestor {
    checker: Arc<TimeoutChecker>,
    tz: FixedOffset,
}

impl Ingestor {
    pub fn new(checker: Arc<TimeoutChecker>, tz: FixedOffset) -> Self {
        Self { checker, tz }
    }

    /// Store the event and start or stop deadline tracking for its key.
    ///
    /// Triggers spawn their deadline timer on the current runtime.
    pub async fn ingest(&self, request: AlertRequest) -> Result<Ingested, IngestError> {
        let kind = AlertKind::parse(&request.kind)
            .ok_or_else(|| IngestError::UnknownKind(request.kind.clone()))?;
        if request.entity_name.trim().is_empty() {
            return Err(IngestError::MissingField("entity_name"));
        }
        if request.alert_key.trim().is_empty() {
            return Err(IngestError::MissingField("alert_key"));
        }

        let occurred_at = parse_timestamp(&request.time, &self.tz).unwrap_or_else(|| {
            let now = now_in(&self.tz);
            tracing::warn!(time = %request.time, fallback = %now, "Unparseable alert time, using now");
            now
        });

        let new = NewAlert::new(request.entity_name, request.alert_key, kind, occurred_at)
            .with_payload(request.input)
            .with_template(request.template_name)
            .with_category(request.category);

        let store = self.checker.store();
        let alert = run_blocking(store, move |store| store.insert(new)).await?;
        tracing::info!(
            alert_id = alert.id,
            kind = %alert.kind,
            entity = %alert.entity_name,
            alert_key = %alert.alert_key,
            occurred_at = %alert.occurred_at,
            "Alert stored"
        );

        let resolved_triggers = match kind {
            AlertKind::Trigger => {
                self.checker.arm(alert.id);
                0
            }
            AlertKind::Recovery => {
                // Unbounded when the window start is not representable
                let not_before = chrono::Duration::from_std(self.checker.timeout())
                    .ok()
                    .and_then(|timeout| alert.occurred_at.checked_sub_signed(timeout));
                let key = alert.correlation_key();
                let recovered_at = alert.occurred_at;
                let resolved = {
                    let key = key.clone();
                    run_blocking(store, move |store| {
                        store.mark_resolved(&key, not_before, recovered_at)
                    })
                    .await?
                };
                if resolved > 0 {
                    tracing::info!(
                        recovery_id = alert.id,
                        key = %key,
                        resolved,
                        "Recovery resolved open triggers"
                    );
                }
                resolved
            }
        };

        Ok(Ingested {
            alert,
            resolved_triggers,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unknown alert kind '{0}', expected trigger or recovery")]
    UnknownKind(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::checker::tests::{at, tz, RecordingNotifier};
    use crate::storage::{AlertStore, MemoryAlertStore};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryAlertStore>, Arc<RecordingNotifier>, Ingestor) {
        let store = Arc::new(MemoryAlertStore::new(tz()));
        let notifier = Arc::new(RecordingNotifier::default());
        let checker = Arc::new(TimeoutChecker::new(
            store.clone(),
            notifier.clone(),
            Duration::from_secs(25 * 60),
            tz(),
        ));
        (store, notifier, Ingestor::new(checker, tz()))
    }

    fn request(kind: &str, time: &str) -> AlertRequest {
        AlertRequest {
            input: "connection rate dropped".to_string(),
            entity_name: "E".to_string(),
            time: time.to_string(),
            category: "metric".to_string(),
            template_name: "rate".to_string(),
            kind: kind.to_string(),
            alert_key: "k1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_trigger_is_stored_open() {
        let (store, _, ingestor) = setup();
        let ingested = ingestor
            .ingest(request("告警触发", "2024-05-01 10:00:00"))
            .await
            .unwrap();

        assert_eq!(ingested.alert.kind, AlertKind::Trigger);
        assert_eq!(ingested.alert.occurred_at, at(10, 0, 0));
        assert_eq!(ingested.resolved_triggers, 0);
        assert!(store.find_open_trigger(ingested.alert.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_recovery_in_window_resolves_trigger() {
        let (store, notifier, ingestor) = setup();
        let trigger = ingestor
            .ingest(request("trigger", "2024-05-01 10:00:00"))
            .await
            .unwrap();
        let recovery = ingestor
            .ingest(request("recovery", "2024-05-01 10:20:00"))
            .await
            .unwrap();

        assert_eq!(recovery.resolved_triggers, 1);
        let stored = store.get(trigger.alert.id).unwrap().unwrap();
        assert!(stored.resolved);
        assert!(!stored.notified);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn test_recovery_before_trigger_does_not_resolve() {
        let (store, _, ingestor) = setup();
        let trigger = ingestor
            .ingest(request("trigger", "2024-05-01 10:00:00"))
            .await
            .unwrap();
        let recovery = ingestor
            .ingest(request("recovery", "2024-05-01 09:59:00"))
            .await
            .unwrap();

        assert_eq!(recovery.resolved_triggers, 0);
        assert!(!store.get(trigger.alert.id).unwrap().unwrap().resolved);
    }

    #[tokio::test]
    async fn test_late_recovery_leaves_trigger_open() {
        let (store, _, ingestor) = setup();
        let trigger = ingestor
            .ingest(request("trigger", "2024-05-01 10:00:00"))
            .await
            .unwrap();
        let recovery = ingestor
            .ingest(request("recovery", "2024-05-01 10:26:00"))
            .await
            .unwrap();

        assert_eq!(recovery.resolved_triggers, 0);
        assert!(store.find_open_trigger(trigger.alert.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (store, _, ingestor) = setup();

        let err = ingestor
            .ingest(request("resolved?", "2024-05-01 10:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownKind(_)));

        let mut missing = request("trigger", "2024-05-01 10:00:00");
        missing.alert_key = " ".to_string();
        let err = ingestor.ingest(missing).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingField("alert_key")));

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_time_falls_back_to_now() {
        let (_, _, ingestor) = setup();
        let before = now_in(&tz());
        let ingested = ingestor.ingest(request("trigger", "soon")).await.unwrap();
        assert!(ingested.alert.occurred_at >= before - chrono::Duration::seconds(1));
    }

    #[tokio::test]
    async fn test_recovery_at_earliest_date_is_unbounded() {
        let (store, _, ingestor) = setup();
        let trigger = ingestor
            .ingest(request("trigger", "-262143-01-01 08:00:00"))
            .await
            .unwrap();
        let recovery = ingestor
            .ingest(request("recovery", "-262143-01-01 08:10:00"))
            .await
            .unwrap();

        assert_eq!(recovery.resolved_triggers, 1);
        assert!(store.get(trigger.alert.id).unwrap().unwrap().resolved);
    }
}
