//! SQLite database operations

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::{Result, ValidationError};
use crate::store::model::{Hostname, NotificationRecord, UserName, WhitelistEntry, WhitelistScope};
use crate::store::{default_whitelist_duration, WhitelistStore};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS user (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS node (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS whitelist (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL REFERENCES user (id) ON DELETE CASCADE,
    node_id    INTEGER REFERENCES node (id) ON DELETE CASCADE,
    start_time INTEGER NOT NULL,
    end_time   INTEGER NOT NULL,
    global     INTEGER NOT NULL DEFAULT 0,
    CHECK ((global = 1 AND node_id IS NULL) OR (global = 0 AND node_id IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS notification (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL REFERENCES user (id) ON DELETE CASCADE,
    node_id    INTEGER NOT NULL REFERENCES node (id) ON DELETE CASCADE,
    time       INTEGER NOT NULL,
    memory     INTEGER NOT NULL CHECK (memory >= 0),
    percentage REAL NOT NULL CHECK (percentage >= 0 AND percentage <= 100),
    mem_limit  REAL NOT NULL CHECK (mem_limit >= 0)
);

CREATE INDEX IF NOT EXISTS whitelist_user_end ON whitelist (user_id, end_time);
CREATE INDEX IF NOT EXISTS notification_user_time ON notification (user_id, time);
"#;

const ENTRY_COLUMNS: &str = "w.id, u.name, n.hostname, w.start_time, w.end_time, w.global
     FROM whitelist w
     JOIN user u ON u.id = w.user_id
     LEFT JOIN node n ON n.id = w.node_id";

const NOTIFICATION_COLUMNS: &str = "u.name, n.hostname, t.time, t.memory, t.percentage, t.mem_limit
     FROM notification t
     JOIN user u ON u.id = t.user_id
     JOIN node n ON n.id = t.node_id";

/// Ends the active entries matching `filter` at `?1`.
///
/// Entries starting at `?1` never took effect and are deleted, so every
/// stored interval keeps `end_time > start_time`.
fn end_entries(
    tx: &Transaction<'_>,
    filter: &str,
    params: &[&dyn ToSql],
) -> rusqlite::Result<usize> {
    let deleted = tx.execute(
        &format!("DELETE FROM whitelist WHERE {filter} AND start_time = ?1 AND end_time > ?1"),
        params,
    )?;
    let ended = tx.execute(
        &format!(
            "UPDATE whitelist SET end_time = ?1
             WHERE {filter} AND start_time < ?1 AND end_time > ?1"
        ),
        params,
    )?;
    Ok(deleted + ended)
}

/// Owned handle to the node-nanny database.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create database directory {}: {}", parent.display(), e);
            }
        }
        let conn = Connection::open(path)?;
        // Other node-nanny invocations may hold the write lock briefly
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_entry(row: &Row) -> rusqlite::Result<WhitelistEntry> {
        let node: Option<String> = row.get(2)?;
        Ok(WhitelistEntry {
            id: row.get(0)?,
            user: validated(1, UserName::parse(&row.get::<_, String>(1)?))?,
            node: node
                .map(|h| validated(2, Hostname::parse(&h)))
                .transpose()?,
            start_time: from_millis(3, row.get(3)?)?,
            end_time: from_millis(4, row.get(4)?)?,
            global: row.get(5)?,
        })
    }

    fn map_notification(row: &Row) -> rusqlite::Result<NotificationRecord> {
        Ok(NotificationRecord {
            user: validated(0, UserName::parse(&row.get::<_, String>(0)?))?,
            node: validated(1, Hostname::parse(&row.get::<_, String>(1)?))?,
            time: from_millis(2, row.get(2)?)?,
            memory: row.get(3)?,
            percentage: row.get(4)?,
            limit: row.get(5)?,
        })
    }
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn validated<T>(idx: usize, value: std::result::Result<T, ValidationError>) -> rusqlite::Result<T> {
    value.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ensure_user(conn: &Connection, user: &UserName) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO user (name) VALUES (?1)",
        params![user.as_str()],
    )?;
    conn.query_row(
        "SELECT id FROM user WHERE name = ?1",
        params![user.as_str()],
        |row| row.get(0),
    )
}

fn ensure_node(conn: &Connection, node: &Hostname) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO node (hostname) VALUES (?1)",
        params![node.as_str()],
    )?;
    conn.query_row(
        "SELECT id FROM node WHERE hostname = ?1",
        params![node.as_str()],
        |row| row.get(0),
    )
}

impl WhitelistStore for Database {
    fn is_exempt(&self, user: &UserName, node: &Hostname, now: DateTime<Utc>) -> Result<bool> {
        let exempt = self.conn().query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM whitelist w
                 JOIN user u ON u.id = w.user_id
                 LEFT JOIN node n ON n.id = w.node_id
                 WHERE u.name = ?1
                   AND w.start_time <= ?3 AND w.end_time > ?3
                   AND (w.global = 1 OR n.hostname = ?2)
             )",
            params![user.as_str(), node.as_str(), now.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(exempt)
    }

    fn add(
        &self,
        user: &UserName,
        node: Option<&Hostname>,
        duration: Option<Duration>,
        global: bool,
        now: DateTime<Utc>,
    ) -> Result<WhitelistEntry> {
        let scope = WhitelistScope::from_args(node, global)?;
        let duration = duration.unwrap_or_else(default_whitelist_duration);
        if duration <= Duration::zero() {
            return Err(ValidationError::Duration.into());
        }
        let end_time = now
            .checked_add_signed(duration)
            .ok_or(ValidationError::Duration)?;
        let now_ms = now.timestamp_millis();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let user_id = ensure_user(&tx, user)?;
        let node_id = match &scope {
            WhitelistScope::Node(hostname) => Some(ensure_node(&tx, hostname)?),
            WhitelistScope::Global => None,
        };

        let existing: Option<(i64, i64, i64)> = tx
            .query_row(
                "SELECT id, start_time, end_time FROM whitelist
                 WHERE user_id = ?1 AND global = ?2 AND node_id IS ?3
                   AND start_time <= ?4 AND end_time > ?4
                 ORDER BY end_time DESC
                 LIMIT 1",
                params![user_id, global, node_id, now_ms],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (id, start_ms, end_ms) = match existing {
            Some((id, start_ms, current_end)) => {
                let end_ms = current_end.max(end_time.timestamp_millis());
                tx.execute(
                    "UPDATE whitelist SET end_time = ?1 WHERE id = ?2",
                    params![end_ms, id],
                )?;
                debug!("Extended whitelist entry {} for {}", id, user);
                (id, start_ms, end_ms)
            }
            None => {
                tx.execute(
                    "INSERT INTO whitelist (user_id, node_id, start_time, end_time, global)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![user_id, node_id, now_ms, end_time.timestamp_millis(), global],
                )?;
                let id = tx.last_insert_rowid();
                debug!("Created whitelist entry {} for {}", id, user);
                (id, now_ms, end_time.timestamp_millis())
            }
        };

        tx.commit()?;

        Ok(WhitelistEntry {
            id,
            user: user.clone(),
            node: match scope {
                WhitelistScope::Node(hostname) => Some(hostname),
                WhitelistScope::Global => None,
            },
            start_time: from_millis(0, start_ms)?,
            end_time: from_millis(0, end_ms)?,
            global,
        })
    }

    fn remove(
        &self,
        user: &UserName,
        node: Option<&Hostname>,
        global: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let scope = WhitelistScope::from_args(node, global)?;
        let now_ms = now.timestamp_millis();

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let ended = match &scope {
            WhitelistScope::Node(hostname) => {
                let filter = "user_id = (SELECT id FROM user WHERE name = ?2)
                    AND node_id = (SELECT id FROM node WHERE hostname = ?3)";
                end_entries(&tx, filter, params![now_ms, user.as_str(), hostname.as_str()])?
            }
            WhitelistScope::Global => {
                let filter = "user_id = (SELECT id FROM user WHERE name = ?2)";
                end_entries(&tx, filter, params![now_ms, user.as_str()])?
            }
        };

        tx.commit()?;
        debug!("Ended {} whitelist entries for {}", ended, user);
        Ok(ended)
    }

    fn record_notification(&self, record: &NotificationRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let user_id = ensure_user(&tx, &record.user)?;
        let node_id = ensure_node(&tx, &record.node)?;
        tx.execute(
            "INSERT INTO notification (user_id, node_id, time, memory, percentage, mem_limit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                node_id,
                record.time.timestamp_millis(),
                record.memory,
                record.percentage,
                record.limit
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn active_exemptions(&self, node: &Hostname, now: DateTime<Utc>) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT u.name FROM whitelist w
             JOIN user u ON u.id = w.user_id
             LEFT JOIN node n ON n.id = w.node_id
             WHERE w.start_time <= ?2 AND w.end_time > ?2
               AND (w.global = 1 OR n.hostname = ?1)",
        )?;
        let users = stmt
            .query_map(params![node.as_str(), now.timestamp_millis()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(users)
    }

    fn active_entries(&self, now: DateTime<Utc>) -> Result<Vec<WhitelistEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             WHERE w.start_time <= ?1 AND w.end_time > ?1
             ORDER BY u.name, w.global DESC, n.hostname"
        ))?;
        let entries = stmt
            .query_map(params![now.timestamp_millis()], Self::map_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn notification_history(&self, user: Option<&UserName>) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn();
        let records = if let Some(user) = user {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS}
                 WHERE u.name = ?1
                 ORDER BY t.time DESC, t.id DESC"
            ))?;
            let rows = stmt
                .query_map(params![user.as_str()], Self::map_notification)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS}
                 ORDER BY t.time DESC, t.id DESC"
            ))?;
            let rows = stmt
                .query_map([], Self::map_notification)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        Ok(records)
    }
}
