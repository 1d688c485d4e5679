use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;

use super::{AlertFilter, AlertStore, StorageError};
use crate::alerts::model::{now_in, Alert, AlertKind, CorrelationKey, DeadlineWindow, NewAlert};

/// In-process alert store
///
/// All state transitions happen under the write lock, which gives the same
/// row-level atomicity as a conditional `UPDATE`.
pub struct MemoryAlertStore {
    alerts: RwLock<BTreeMap<i64, Alert>>,
    next_id: AtomicI64,
    tz: FixedOffset,
}

impl MemoryAlertStore {
    pub fn new(tz: FixedOffset) -> Self {
        Self {
            alerts: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            tz,
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    fn delete_where(&self, predicate: impl Fn(&Alert) -> bool) -> usize {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, alert| !predicate(alert));
        before - alerts.len()
    }
}

impl AlertStore for MemoryAlertStore {
    fn insert(&self, alert: NewAlert) -> Result<Alert, StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let alert = Alert::from_new(id, alert, now_in(&self.tz));
        self.alerts.write().insert(id, alert.clone());
        Ok(alert)
    }

    fn get(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        Ok(self.alerts.read().get(&id).cloned())
    }

    fn find_open_trigger(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        Ok(self
            .alerts
            .read()
            .get(&id)
            .filter(|a| a.is_open_trigger())
            .cloned())
    }

    fn mark_resolved(
        &self,
        key: &CorrelationKey,
        not_before: Option<DateTime<FixedOffset>>,
        not_later_than: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        let mut alerts = self.alerts.write();
        let mut changed = 0;
        for alert in alerts.values_mut() {
            if alert.is_open_trigger()
                && alert.entity_name == key.entity_name
                && alert.alert_key == key.alert_key
                && alert.occurred_at <= not_later_than
                && not_before.map_or(true, |start| alert.occurred_at >= start)
            {
                alert.resolved = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn mark_resolved_by_id(&self, id: i64) -> Result<bool, StorageError> {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(&id) {
            Some(alert) if alert.is_open_trigger() => {
                alert.resolved = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_open_triggers(&self) -> Result<Vec<Alert>, StorageError> {
        let mut open: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| a.is_open_trigger())
            .cloned()
            .collect();
        open.sort_by_key(|a| (a.occurred_at, a.id));
        Ok(open)
    }

    fn find_recovery_in_window(
        &self,
        key: &CorrelationKey,
        window: &DeadlineWindow,
    ) -> Result<Option<Alert>, StorageError> {
        Ok(self
            .alerts
            .read()
            .values()
            .filter(|a| {
                a.kind == AlertKind::Recovery
                    && a.entity_name == key.entity_name
                    && a.alert_key == key.alert_key
                    && window.contains(a.occurred_at)
            })
            .min_by_key(|a| (a.occurred_at, a.id))
            .cloned())
    }

    fn try_mark_notified(&self, id: i64) -> Result<bool, StorageError> {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(&id) {
            Some(alert) if alert.is_open_trigger() => {
                alert.notified = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StorageError> {
        Ok(self.delete_where(|a| a.occurred_at < cutoff))
    }

    fn delete_resolved_or_notified_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        Ok(self.delete_where(|a| start <= a.occurred_at && a.occurred_at < end && a.is_settled()))
    }

    fn list_unsettled_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<Alert>, StorageError> {
        Ok(self
            .alerts
            .read()
            .values()
            .filter(|a| start <= a.occurred_at && a.occurred_at < end && !a.is_settled())
            .cloned()
            .collect())
    }

    fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        Ok(alerts
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn trigger(key: &str, occurred_at: DateTime<FixedOffset>) -> NewAlert {
        NewAlert::new("acme", key, AlertKind::Trigger, occurred_at)
    }

    fn recovery(key: &str, occurred_at: DateTime<FixedOffset>) -> NewAlert {
        NewAlert::new("acme", key, AlertKind::Recovery, occurred_at)
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = MemoryAlertStore::new(tz());
        let a = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        let b = store.insert(trigger("k1", at(10, 1, 0))).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.len(), 2);
        assert!(!a.resolved && !a.notified);
    }

    #[test]
    fn test_find_open_trigger_skips_recoveries_and_settled() {
        let store = MemoryAlertStore::new(tz());
        let t = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        let r = store.insert(recovery("k1", at(10, 5, 0))).unwrap();

        assert!(store.find_open_trigger(t.id).unwrap().is_some());
        assert!(store.find_open_trigger(r.id).unwrap().is_none());
        assert!(store.find_open_trigger(999).unwrap().is_none());

        assert!(store.try_mark_notified(t.id).unwrap());
        assert!(store.find_open_trigger(t.id).unwrap().is_none());
    }

    #[test]
    fn test_mark_resolved_respects_key_and_bounds() {
        let store = MemoryAlertStore::new(tz());
        let early = store.insert(trigger("k1", at(9, 0, 0))).unwrap();
        let inside = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        let later = store.insert(trigger("k1", at(10, 30, 0))).unwrap();
        let other = store.insert(trigger("k2", at(10, 0, 0))).unwrap();

        let key = CorrelationKey::new("acme", "k1");
        let changed = store
            .mark_resolved(&key, Some(at(9, 55, 0)), at(10, 20, 0))
            .unwrap();
        assert_eq!(changed, 1);

        assert!(!store.get(early.id).unwrap().unwrap().resolved);
        assert!(store.get(inside.id).unwrap().unwrap().resolved);
        assert!(!store.get(later.id).unwrap().unwrap().resolved);
        assert!(!store.get(other.id).unwrap().unwrap().resolved);

        // Already resolved rows are not counted again
        let changed = store.mark_resolved(&key, None, at(10, 20, 0)).unwrap();
        assert_eq!(changed, 1);
        assert!(store.get(early.id).unwrap().unwrap().resolved);
    }

    #[test]
    fn test_mark_resolved_skips_notified() {
        let store = MemoryAlertStore::new(tz());
        let t = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        assert!(store.try_mark_notified(t.id).unwrap());

        let key = CorrelationKey::new("acme", "k1");
        assert_eq!(store.mark_resolved(&key, None, at(10, 26, 0)).unwrap(), 0);

        let stored = store.get(t.id).unwrap().unwrap();
        assert!(stored.notified);
        assert!(!stored.resolved);
    }

    #[test]
    fn test_try_mark_notified_only_once() {
        let store = MemoryAlertStore::new(tz());
        let t = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        assert!(store.try_mark_notified(t.id).unwrap());
        assert!(!store.try_mark_notified(t.id).unwrap());
    }

    #[test]
    fn test_try_mark_notified_refuses_resolved() {
        let store = MemoryAlertStore::new(tz());
        let t = store.insert(trigger("k1", at(10, 0, 0))).unwrap();
        assert!(store.mark_resolved_by_id(t.id).unwrap());
        assert!(!store.try_mark_notified(t.id).unwrap());
        assert!(!store.mark_resolved_by_id(t.id).unwrap());
    }

    #[test]
    fn test_concurrent_cas_has_single_winner() {
        let store = Arc::new(MemoryAlertStore::new(tz()));
        let t = store.insert(trigger("k1", at(10, 0, 0))).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.try_mark_notified(t.id).unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_find_recovery_in_window() {
        let store = MemoryAlertStore::new(tz());
        store.insert(recovery("k1", at(9, 59, 59))).unwrap();
        store.insert(recovery("k2", at(10, 10, 0))).unwrap();

        let key = CorrelationKey::new("acme", "k1");
        let window = DeadlineWindow::for_trigger(at(10, 0, 0), Duration::from_secs(25 * 60));
        assert!(store.find_recovery_in_window(&key, &window).unwrap().is_none());

        store.insert(recovery("k1", at(10, 25, 0))).unwrap();
        let found = store.find_recovery_in_window(&key, &window).unwrap().unwrap();
        assert_eq!(found.occurred_at, at(10, 25, 0));
    }

    #[test]
    fn test_retention_deletes() {
        let store = MemoryAlertStore::new(tz());
        let old = store.insert(trigger("k1", at(9, 0, 0))).unwrap();
        let open = store.insert(trigger("k2", at(10, 0, 0))).unwrap();
        let done = store.insert(trigger("k3", at(10, 0, 0))).unwrap();
        store.try_mark_notified(done.id).unwrap();

        assert_eq!(store.delete_older_than(at(9, 30, 0)).unwrap(), 1);
        assert!(store.get(old.id).unwrap().is_none());

        let kept = store.list_unsettled_in_range(at(9, 30, 0), at(11, 0, 0)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, open.id);

        assert_eq!(
            store
                .delete_resolved_or_notified_in_range(at(9, 30, 0), at(11, 0, 0))
                .unwrap(),
            1
        );
        assert!(store.get(open.id).unwrap().is_some());
        assert!(store.get(done.id).unwrap().is_none());
    }

    #[test]
    fn test_list_filters_and_pages_newest_first() {
        let store = MemoryAlertStore::new(tz());
        for minute in 0..5 {
            store
                .insert(trigger("k1", at(10, minute, 0)).with_category("latency"))
                .unwrap();
        }
        store
            .insert(NewAlert::new("other", "k1", AlertKind::Trigger, at(11, 0, 0)))
            .unwrap();

        let filter = AlertFilter {
            entity_name: Some("acme".to_string()),
            category: Some("latency".to_string()),
            skip: 1,
            limit: 2,
        };
        let page = store.list(&filter).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].occurred_at, at(10, 3, 0));
        assert_eq!(page[1].occurred_at, at(10, 2, 0));

        assert_eq!(store.list(&AlertFilter::default()).unwrap().len(), 6);
    }
}
