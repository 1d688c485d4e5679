use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{AlertFilter, AlertStore, StorageError};
use crate::alerts::model::{now_in, Alert, AlertKind, CorrelationKey, DeadlineWindow, NewAlert};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    payload_text   TEXT    NOT NULL,
    entity_name    TEXT    NOT NULL,
    alert_key      TEXT    NOT NULL,
    kind           TEXT    NOT NULL,
    occurred_at_ms INTEGER NOT NULL,
    template_name  TEXT    NOT NULL,
    category       TEXT    NOT NULL,
    resolved       INTEGER NOT NULL DEFAULT 0,
    notified       INTEGER NOT NULL DEFAULT 0,
    created_at_ms  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_correlation
    ON alerts (entity_name, alert_key, kind, occurred_at_ms);
CREATE INDEX IF NOT EXISTS idx_alerts_open
    ON alerts (kind, resolved, notified);
CREATE INDEX IF NOT EXISTS idx_alerts_occurred_at
    ON alerts (occurred_at_ms);
";

const COLUMNS: &str = "id, payload_text, entity_name, alert_key, kind, occurred_at_ms, \
                       template_name, category, resolved, notified, created_at_ms";

const OPEN_TRIGGER: &str = "kind = 'trigger' AND resolved = 0 AND notified = 0";

/// SQLite-backed alert store
///
/// Timestamps are stored as epoch milliseconds and rebuilt in the store's
/// reference timezone on read.
pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
    tz: FixedOffset,
}

/// Column values as read from a row, before validation
struct RawAlert {
    id: i64,
    payload_text: String,
    entity_name: String,
    alert_key: String,
    kind: String,
    occurred_at_ms: i64,
    template_name: String,
    category: String,
    resolved: bool,
    notified: bool,
    created_at_ms: i64,
}

impl RawAlert {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload_text: row.get(1)?,
            entity_name: row.get(2)?,
            alert_key: row.get(3)?,
            kind: row.get(4)?,
            occurred_at_ms: row.get(5)?,
            template_name: row.get(6)?,
            category: row.get(7)?,
            resolved: row.get(8)?,
            notified: row.get(9)?,
            created_at_ms: row.get(10)?,
        })
    }

    fn into_alert(self, tz: &FixedOffset) -> Result<Alert, StorageError> {
        let kind = AlertKind::parse(&self.kind).ok_or_else(|| StorageError::Corrupted {
            id: self.id,
            reason: format!("unknown kind '{}'", self.kind),
        })?;

        Ok(Alert {
            id: self.id,
            payload_text: self.payload_text,
            entity_name: self.entity_name,
            alert_key: self.alert_key,
            kind,
            occurred_at: from_millis(self.occurred_at_ms, tz)?,
            template_name: self.template_name,
            category: self.category,
            resolved: self.resolved,
            notified: self.notified,
            created_at: from_millis(self.created_at_ms, tz)?,
        })
    }
}

fn to_millis(at: DateTime<FixedOffset>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64, tz: &FixedOffset) -> Result<DateTime<FixedOffset>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|utc| utc.with_timezone(tz))
        .ok_or(StorageError::InvalidTimestamp(ms))
}

impl SqliteAlertStore {
    pub fn open(path: impl AsRef<Path>, tz: FixedOffset) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn, tz)
    }

    pub fn in_memory(tz: FixedOffset) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, tz)
    }

    fn bootstrap(conn: Connection, tz: FixedOffset) -> Result<Self, StorageError> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "SQLite store opened");
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tz,
        })
    }

    fn query_alerts(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Alert>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, RawAlert::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| r.into_alert(&self.tz)).collect()
    }

    fn query_one(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Alert>, StorageError> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(sql, params, RawAlert::from_row).optional()?
        };
        raw.map(|r| r.into_alert(&self.tz)).transpose()
    }
}

impl AlertStore for SqliteAlertStore {
    fn insert(&self, alert: NewAlert) -> Result<Alert, StorageError> {
        let created_at = now_in(&self.tz);
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO alerts (payload_text, entity_name, alert_key, kind, occurred_at_ms,
                                     template_name, category, resolved, notified, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8)",
                params![
                    alert.payload_text,
                    alert.entity_name,
                    alert.alert_key,
                    alert.kind.as_str(),
                    to_millis(alert.occurred_at),
                    alert.template_name,
                    alert.category,
                    to_millis(created_at),
                ],
            )?;
            conn.last_insert_rowid()
        };

        // Round-trip through millisecond precision so the returned record
        // matches what a later read produces.
        let occurred_at = from_millis(to_millis(alert.occurred_at), &self.tz)?;
        let created_at = from_millis(to_millis(created_at), &self.tz)?;
        Ok(Alert::from_new(id, NewAlert { occurred_at, ..alert }, created_at))
    }

    fn get(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM alerts WHERE id = ?1"),
            params![id],
        )
    }

    fn find_open_trigger(&self, id: i64) -> Result<Option<Alert>, StorageError> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM alerts WHERE id = ?1 AND {OPEN_TRIGGER}"),
            params![id],
        )
    }

    fn mark_resolved(
        &self,
        key: &CorrelationKey,
        not_before: Option<DateTime<FixedOffset>>,
        not_later_than: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE alerts SET resolved = 1
                 WHERE entity_name = ?1 AND alert_key = ?2 AND {OPEN_TRIGGER}
                   AND occurred_at_ms <= ?3
                   AND (?4 IS NULL OR occurred_at_ms >= ?4)"
            ),
            params![
                key.entity_name,
                key.alert_key,
                to_millis(not_later_than),
                not_before.map(to_millis),
            ],
        )?;
        Ok(changed)
    }

    fn mark_resolved_by_id(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("UPDATE alerts SET resolved = 1 WHERE id = ?1 AND {OPEN_TRIGGER}"),
            params![id],
        )?;
        Ok(changed == 1)
    }

    fn list_open_triggers(&self) -> Result<Vec<Alert>, StorageError> {
        self.query_alerts(
            &format!(
                "SELECT {COLUMNS} FROM alerts WHERE {OPEN_TRIGGER}
                 ORDER BY occurred_at_ms ASC, id ASC"
            ),
            params![],
        )
    }

    fn find_recovery_in_window(
        &self,
        key: &CorrelationKey,
        window: &DeadlineWindow,
    ) -> Result<Option<Alert>, StorageError> {
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM alerts
                 WHERE entity_name = ?1 AND alert_key = ?2 AND kind = 'recovery'
                   AND occurred_at_ms >= ?3 AND occurred_at_ms <= ?4
                 ORDER BY occurred_at_ms ASC, id ASC
                 LIMIT 1"
            ),
            params![
                key.entity_name,
                key.alert_key,
                to_millis(window.start),
                to_millis(window.end),
            ],
        )
    }

    fn try_mark_notified(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("UPDATE alerts SET notified = 1 WHERE id = ?1 AND {OPEN_TRIGGER}"),
            params![id],
        )?;
        Ok(changed == 1)
    }

    fn delete_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM alerts WHERE occurred_at_ms < ?1",
            params![to_millis(cutoff)],
        )?;
        Ok(deleted)
    }

    fn delete_resolved_or_notified_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM alerts
             WHERE occurred_at_ms >= ?1 AND occurred_at_ms < ?2
               AND (resolved = 1 OR notified = 1)",
            params![to_millis(start), to_millis(end)],
        )?;
        Ok(deleted)
    }

    fn list_unsettled_in_range(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Vec<Alert>, StorageError> {
        self.query_alerts(
            &format!(
                "SELECT {COLUMNS} FROM alerts
                 WHERE occurred_at_ms >= ?1 AND occurred_at_ms < ?2
                   AND resolved = 0 AND notified = 0
                 ORDER BY occurred_at_ms ASC, id ASC"
            ),
            params![to_millis(start), to_millis(end)],
        )
    }

    fn list(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StorageError> {
        self.query_alerts(
            &format!(
                "SELECT {COLUMNS} FROM alerts
                 WHERE (?1 IS NULL OR entity_name = ?1)
                   AND (?2 IS NULL OR category = ?2)
                 ORDER BY occurred_at_ms DESC, id DESC
                 LIMIT ?3 OFFSET ?4"
            ),
            params![
                filter.entity_name,
                filter.category,
                i64::try_from(filter.limit).unwrap_or(i64::MAX),
                i64::try_from(filter.skip).unwrap_or(i64::MAX),
            ],
        )
    }
}
