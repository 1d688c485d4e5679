//! Alert record types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Current wall time in the given reference timezone
pub fn now_in(tz: &FixedOffset) -> DateTime<FixedOffset> {
    chrono::Utc::now().with_timezone(tz)
}

/// Whether an event opens or closes a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Trigger,
    Recovery,
}

impl AlertKind {
    /// Parse the kind label sent by upstream workflows.
    ///
    /// Accepts the English names and the Chinese labels emitted by the
    /// monitoring templates ("告警触发" / "告警恢复").
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("trigger") || label == "告警触发" {
            Some(AlertKind::Trigger)
        } else if label.eq_ignore_ascii_case("recovery") || label == "告警恢复" {
            Some(AlertKind::Recovery)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Trigger => "trigger",
            AlertKind::Recovery => "recovery",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (entity, alert key) pair identifying one logical condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub entity_name: String,
    pub alert_key: String,
}

impl CorrelationKey {
    pub fn new(entity_name: impl Into<String>, alert_key: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            alert_key: alert_key.into(),
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_name, self.alert_key)
    }
}

/// An alert as handed to the store, before it has an id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    /// Free-text message body, carried through unchanged
    pub payload_text: String,
    pub entity_name: String,
    pub alert_key: String,
    pub kind: AlertKind,
    /// Business time of the event in the reference timezone
    pub occurred_at: DateTime<FixedOffset>,
    pub template_name: String,
    /// Upstream category label (opaque)
    pub category: String,
}

impl NewAlert {
    pub fn new(
        entity_name: impl Into<String>,
        alert_key: impl Into<String>,
        kind: AlertKind,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            payload_text: String::new(),
            entity_name: entity_name.into(),
            alert_key: alert_key.into(),
            kind,
            occurred_at,
            template_name: String::new(),
            category: String::new(),
        }
    }

    pub fn with_payload(mut self, payload_text: impl Into<String>) -> Self {
        self.payload_text = payload_text.into();
        self
    }

    pub fn with_template(mut self, template_name: impl Into<String>) -> Self {
        self.template_name = template_name.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::new(&self.entity_name, &self.alert_key)
    }
}

/// A persisted alert record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub payload_text: String,
    pub entity_name: String,
    pub alert_key: String,
    pub kind: AlertKind,
    pub occurred_at: DateTime<FixedOffset>,
    pub template_name: String,
    pub category: String,
    /// A matching recovery was observed, or the record was superseded
    pub resolved: bool,
    /// The timeout notification path has been taken for this record
    pub notified: bool,
    /// Ingestion time
    pub created_at: DateTime<FixedOffset>,
}

impl Alert {
    pub fn from_new(id: i64, new: NewAlert, created_at: DateTime<FixedOffset>) -> Self {
        Self {
            id,
            payload_text: new.payload_text,
            entity_name: new.entity_name,
            alert_key: new.alert_key,
            kind: new.kind,
            occurred_at: new.occurred_at,
            template_name: new.template_name,
            category: new.category,
            resolved: false,
            notified: false,
            created_at,
        }
    }

    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::new(&self.entity_name, &self.alert_key)
    }

    /// A trigger that is neither resolved nor notified
    pub fn is_open_trigger(&self) -> bool {
        self.kind == AlertKind::Trigger && !self.resolved && !self.notified
    }

    /// Resolved or notified; safe for the reaper to discard
    pub fn is_settled(&self) -> bool {
        self.resolved || self.notified
    }
}

/// The closed interval `[start, end]` in which a recovery counts as timely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DeadlineWindow {
    pub fn for_trigger(occurred_at: DateTime<FixedOffset>, timeout: Duration) -> Self {
        let end = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| occurred_at.checked_add_signed(timeout))
            .unwrap_or(occurred_at);
        Self {
            start: occurred_at,
            end,
        }
    }

    pub fn contains(&self, at: DateTime<FixedOffset>) -> bool {
        self.start <= at && at <= self.end
    }

    /// The window has closed and the trigger can be judged
    pub fn is_due(&self, now: DateTime<FixedOffset>) -> bool {
        now > self.end
    }
}
