//! Alert persistence
//!
//! Every component reaches the alert records through the [`AlertStore`]
//! trait. Records only ever move forward: `resolved` and `notified` flip
//! from false to true and are never reset, and [`AlertStore::try_mark_notified`]
//! is the single compare-and-set that decides which detection path gets to
//! send the timeout notification.

pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryAlertStore;
pub use sqlite::SqliteAlertStore;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::alerts::model::{Alert, CorrelationKey, DeadlineWindow, NewAlert};

/// Query filter for listing alerts
#[derive(Debug, Clone)]
pub struct AlertFilter {
    pub entity_name: Option<String>,
    pub category: Option<String>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            entity_name: None,
            category: None,
            skip: 0,
            limit: 100,
        }
    }
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.entity_name
            .as_deref()
            .map_or(true, |name| alert.entity_name == name)
            && self
                .category
                .as_deref()
                .map_or(true, |category| alert.category == category)
    }
}

/// Trait for alert store backends
pub trait AlertStore: Send + Sync {
    /// Persist a new record and return it with its assigned id
    fn insert(&self, alert: NewAlert) -> Result<Alert, StorageError>;

    /// Fetch a record by id regardless of its state
    fn get(&self, id: i64) -> Result<Option<Alert>, StorageError>;

    /// Fetch a record only if it is an open trigger
    fn find_open_trigger(&self, id: i64) -> Result<Option<Alert>, StorageError>;

    /// Resolve every open trigger for `key` with
    /// `not_before <= occurred_at <= not_later_than`. Returns the number of
    /// records that changed.
    fn mark_resolved(
        &self,
        key: &CorrelationKey,
        not_before: Option<DateTime<FixedOffset>>,
        not_later_than: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError>;

    /// Supersede a single open trigger. Returns false if the record is
    /// missing or no longer open.
    fn mark_resolved_by_id(&self, id: i64) -> Result<bool, StorageError>;

    /// Snapshot of all open triggers, oldest first
    fn list_open_triggers(&self) -> Result<Vec<Alert>, StorageError>;

    /// First recovery for `key` whose `occurred_at` lies inside `window`
    fn find_recovery_in_window(
        &self,
        key: &CorrelationKey,
        window: &DeadlineWindow,
    ) -> Result<Option<Alert>, StorageError>;

    /// Atomically flip `notified` on an open trigger. Returns whether this
    /// call performed the flip.
    fn try_mark_notified(&self, id: i64) -> Result<bool, StorageError>;

    /// Delete every record with `occurred_at < cutoff`
    fn delete_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StorageError>;

    /// Delete resolved or notified records with `start <= occurred_at < end`
    fn delete_resolved_or_notified_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError>;

    /// Records with `start <= occurred_at < end` that are neither resolved
    /// nor notified
    fn list_unsettled_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<Alert>, StorageError>;

    /// Newest-first listing for the query API
    fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError>;
}

/// Run a store operation on tokio's blocking pool.
///
/// Store calls may do file I/O, so async code never calls them directly.
/// Each operation still executes as one store call, which keeps the
/// compare-and-set atomic.
pub async fn run_blocking<T, F>(store: &Arc<dyn AlertStore>, op: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&dyn AlertStore) -> Result<T, StorageError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StorageError::Task(format!("Task join error: {e}")))?
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupted record {id}: {reason}")]
    Corrupted { id: i64, reason: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Store task failed: {0}")]
    Task(String),
}
