//! Whitelist and notification persistence.
//!
//! This module provides:
//! - `model`: Validated users, nodes, whitelist entries and notifications
//! - `database`: SQLite-backed implementation of [`WhitelistStore`]

pub mod database;
pub mod model;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::error::Result;

pub use database::Database;
pub use model::{Hostname, NotificationRecord, UserName, WhitelistEntry, WhitelistScope};

/// Whitelist entries without an explicit duration run for 100 years.
pub fn default_whitelist_duration() -> Duration {
    Duration::days(36_500)
}

/// Storage for exemptions and notification history.
pub trait WhitelistStore: Send + Sync {
    /// True iff `user` holds an active entry that is global or scoped to `node`.
    fn is_exempt(&self, user: &UserName, node: &Hostname, now: DateTime<Utc>) -> Result<bool>;

    /// Whitelists `user` on `node`, or everywhere when `global` is set.
    ///
    /// Re-adding a user who already holds an active entry for the same scope
    /// extends that entry instead of creating a second one.
    fn add(
        &self,
        user: &UserName,
        node: Option<&Hostname>,
        duration: Option<Duration>,
        global: bool,
        now: DateTime<Utc>,
    ) -> Result<WhitelistEntry>;

    /// Ends matching active entries at `now` and returns how many were ended.
    /// With a node only that node's entries match; with `global` every
    /// active entry of the user does.
    fn remove(
        &self,
        user: &UserName,
        node: Option<&Hostname>,
        global: bool,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    fn record_notification(&self, record: &NotificationRecord) -> Result<()>;

    /// Users holding an active entry that is global or scoped to `node`.
    fn active_exemptions(&self, node: &Hostname, now: DateTime<Utc>) -> Result<HashSet<String>>;

    /// Every active entry on any node, ordered by user.
    fn active_entries(&self, now: DateTime<Utc>) -> Result<Vec<WhitelistEntry>>;

    /// Notifications, newest first, optionally limited to one user.
    fn notification_history(&self, user: Option<&UserName>) -> Result<Vec<NotificationRecord>>;
}
