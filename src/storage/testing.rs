//! Store wrapper that injects failures into the scan operations

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, FixedOffset};

use super::{AlertFilter, AlertStore, MemoryAlertStore, StorageError};
use crate::alerts::model::{Alert, CorrelationKey, DeadlineWindow, NewAlert};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    Error,
    Panic,
}

/// Fails the first `failures` calls to `list_open_triggers` and
/// `delete_older_than`, delegating everything else to a memory store
pub(crate) struct FlakyStore {
    pub(crate) inner: MemoryAlertStore,
    fault: Fault,
    remaining: AtomicUsize,
    scans: AtomicUsize,
}

impl FlakyStore {
    pub(crate) fn new(inner: MemoryAlertStore, fault: Fault, failures: usize) -> Self {
        Self {
            inner,
            fault,
            remaining: AtomicUsize::new(failures),
            scans: AtomicUsize::new(0),
        }
    }

    /// Number of scan calls seen, failed ones included
    pub(crate) fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    fn scan(&self) -> Result<(), StorageError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !failing {
            return Ok(());
        }
        match self.fault {
            Fault::Error => Err(StorageError::Database(rusqlite::Error::InvalidQuery)),
            Fault::Panic => panic!("store scan failed"),
        }
    }
}

impl AlertStore for FlakyStore {
    fn insert(&self, alert: NewAlert) -> Result<Alert, StorageError> {
        self.inner.insert(alert)
    }

    fn get(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        self.inner.get(id)
    }

    fn find_open_trigger(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        self.inner.find_open_trigger(id)
    }

    fn mark_resolved(
        &self,
        key: &CorrelationKey,
        not_before: Option<DateTime<FixedOffset>>,
        not_later_than: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        self.inner.mark_resolved(key, not_before, not_later_than)
    }

    fn mark_resolved_by_id(&self, id: i64) -> Result<bool, StorageError> {
        self.inner.mark_resolved_by_id(id)
    }

    fn list_open_triggers(&self) -> Result<Vec<Alert>, StorageError> {
        self.scan()?;
        self.inner.list_open_triggers()
    }

    fn find_recovery_in_window(
        &self,
        key: &CorrelationKey,
        window: &DeadlineWindow,
    ) -> Result<Option<Alert>, StorageError> {
        self.inner.find_recovery_in_window(key, window)
    }

    fn try_mark_notified(&self, id: i64) -> Result<bool, StorageError> {
        self.inner.try_mark_notified(id)
    }

    fn delete_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StorageError> {
        self.scan()?;
        self.inner.delete_older_than(cutoff)
    }

    fn delete_resolved_or_notified_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        self.inner.delete_resolved_or_notified_in_range(start, end)
    }

    fn list_unsettled_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<Alert>, StorageError> {
        self.inner.list_unsettled_in_range(start, end)
    }

    fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        self.inner.list(filter)
    }
}
