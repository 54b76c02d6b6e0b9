//! Per-user memory aggregation over a process snapshot.

use ahash::AHashMap as HashMap;

use crate::process::ProcessRecord;

/// Memory held by one user's processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUsage {
    /// Summed memory share in percent of system memory.
    pub memory_share: f64,
    pub rss_bytes: u64,
    pub process_count: usize,
}

/// Per-user totals for a single scan tick.
#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    users: HashMap<String, UserUsage>,
    total: f64,
}

impl UsageSnapshot {
    /// System-wide memory share over all users, in percent.
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn user(&self, name: &str) -> Option<&UserUsage> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = (&str, &UserUsage)> {
        self.users.iter().map(|(name, usage)| (name.as_str(), usage))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Reduces a process snapshot into per-user totals.
pub fn aggregate(records: &[ProcessRecord]) -> UsageSnapshot {
    let mut snapshot = UsageSnapshot::default();

    for record in records {
        let usage = snapshot.users.entry(record.owner.clone()).or_default();
        usage.memory_share += record.memory_share;
        usage.rss_bytes += record.rss_bytes;
        usage.process_count += 1;
        snapshot.total += record.memory_share;
    }

    snapshot
}
