//! alertwatch: trigger timeout detection and notification dispatch
//!
//! Monitoring events arrive as triggers and recoveries keyed by
//! `(entity_name, alert_key)`. A trigger that sees no matching recovery
//! within the alert timeout fires exactly one outbound notification.
//!
//! # Features
//!
//! - **Deadline timers**: one delayed check armed per ingested trigger
//! - **Periodic sweep**: re-evaluates every open trigger, surviving restarts
//! - **Single dispatch**: an atomic compare-and-set in the store decides which path notifies
//! - **Webhook notifier**: posts the timed-out alert to a workflow endpoint
//! - **Daily retention**: drops yesterday's records, keeping open ones near midnight
//! - **SQLite or in-memory storage**
//!
//! # Example
//!
//! ```no_run
//! use alertwatch::alerts::{AlertKind, NewAlert};
//! use alertwatch::storage::{AlertStore, MemoryAlertStore};
//! use chrono::{FixedOffset, Utc};
//!
//! let tz = FixedOffset::east_opt(8 * 3600).unwrap();
//! let store = MemoryAlertStore::new(tz);
//!
//! let now = Utc::now().with_timezone(&tz);
//! let alert = store
//!     .insert(NewAlert::new("acme", "cpu-high", AlertKind::Trigger, now))
//!     .unwrap();
//!
//! assert!(store.try_mark_notified(alert.id).unwrap());
//! assert!(!store.try_mark_notified(alert.id).unwrap());
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod retention;
pub mod storage;

// Re-export commonly used types
pub use alerts::{Alert, AlertKind, TimeoutChecker};
pub use config::{Config, ConfigError};
pub use storage::{AlertStore, StorageError};
