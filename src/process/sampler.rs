//! Point-in-time process snapshots attributed to their owning users.

use ahash::AHashMap as HashMap;
use nix::unistd::{Uid, User};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock as StdRwLock;
use tracing::{debug, instrument};

use crate::error::SampleError;
use crate::process::memory::{memory_share, read_mem_total_kb};
use crate::process::scanner::{collect_proc_entries, read_proc_status};

/// A single running process at sampling time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub owner: String,
    pub name: String,
    /// Resident memory as a percentage of total system memory.
    pub memory_share: f64,
    pub rss_bytes: u64,
}

/// Source of process snapshots.
pub trait ProcessSampler: Send + Sync {
    /// Returns every process currently running on the node. Processes that
    /// exit while the table is being read are skipped.
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, SampleError>;

    /// Returns the processes owned by `user`, or `NotFound` if there are none.
    fn processes_of(&self, user: &str) -> Result<Vec<ProcessRecord>, SampleError> {
        let procs: Vec<ProcessRecord> = self
            .snapshot()?
            .into_iter()
            .filter(|p| p.owner == user)
            .collect();

        if procs.is_empty() {
            Err(SampleError::NotFound(user.to_string()))
        } else {
            Ok(procs)
        }
    }
}

/// Caches UID to username lookups against the system user database.
#[derive(Default)]
pub struct UserResolver {
    cache: StdRwLock<HashMap<u32, String>>,
}

impl UserResolver {
    pub fn resolve(&self, uid: u32) -> String {
        if let Ok(cache) = self.cache.read() {
            if let Some(name) = cache.get(&uid) {
                return name.clone();
            }
        }

        let name = match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => user.name,
            Ok(None) => uid.to_string(),
            Err(e) => {
                debug!("Failed to look up uid {}: {}", uid, e);
                uid.to_string()
            }
        };

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(uid, name.clone());
        }
        name
    }
}

/// Samples processes from a procfs mount.
pub struct ProcSampler {
    proc_root: PathBuf,
    max_processes: Option<usize>,
    users: UserResolver,
}

impl ProcSampler {
    pub fn new(proc_root: impl Into<PathBuf>, max_processes: Option<usize>) -> Self {
        Self {
            proc_root: proc_root.into(),
            max_processes,
            users: UserResolver::default(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::new("/proc", None)
    }
}

impl ProcessSampler for ProcSampler {
    #[instrument(skip(self), fields(root = %self.proc_root.display()))]
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, SampleError> {
        let mem_total_kb = read_mem_total_kb(&self.proc_root.join("meminfo"))?;
        let entries = collect_proc_entries(&self.proc_root, self.max_processes);
        let skipped = AtomicUsize::new(0);

        let records: Vec<ProcessRecord> = entries
            .par_iter()
            .filter_map(|entry| match read_proc_status(&entry.proc_path) {
                Ok(status) => Some(ProcessRecord {
                    pid: entry.pid,
                    owner: self.users.resolve(status.uid),
                    name: status.name,
                    memory_share: memory_share(status.rss_kb, mem_total_kb),
                    rss_bytes: status.rss_kb * 1024,
                }),
                Err(e) => {
                    // Usually the process exited after read_dir listed it
                    debug!("Skipping process {}: {}", entry.pid, e);
                    skipped.fetch_add(1, Ordering::Relaxed);
                    None
                }
            })
            .collect();

        debug!(
            "Sampled {} processes ({} skipped)",
            records.len(),
            skipped.load(Ordering::Relaxed)
        );
        Ok(records)
    }
}
