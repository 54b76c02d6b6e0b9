//! Process scanning utilities for discovering and reading process entries from /proc.
//!
//! This module provides functions to scan the /proc filesystem for process entries
//! and read the owner, name and resident memory of each process.

use std::fs;
use std::path::{Path, PathBuf};

use crate::process::memory::parse_kb_value;

/// Process entry representing a directory in /proc filesystem.
#[derive(Debug, Clone)]
pub struct ProcEntry {
    pub pid: u32,
    pub proc_path: PathBuf,
}

/// Fields of /proc/<pid>/status needed to attribute memory to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStatus {
    pub name: String,
    /// Real UID of the process owner.
    pub uid: u32,
    /// Resident set size in KB; kernel threads report none.
    pub rss_kb: u64,
}

/// Scans /proc directory for process entries with numeric PIDs.
pub fn collect_proc_entries(root: &Path, max: Option<usize>) -> Vec<ProcEntry> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let p = entry.path();
            let name = match p.file_name().and_then(|s| s.to_str()) {
                Some(v) => v,
                None => continue,
            };
            if !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let pid: u32 = match name.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            out.push(ProcEntry { pid, proc_path: p });
            if let Some(maxp) = max {
                if out.len() >= maxp {
                    break;
                }
            }
        }
    }
    out
}

/// Reads and parses /proc/<pid>/status.
///
/// Fails with `NotFound` when the process exited between enumeration and
/// this read.
pub fn read_proc_status(proc_path: &Path) -> Result<ProcStatus, std::io::Error> {
    let content = fs::read_to_string(proc_path.join("status"))?;
    parse_proc_status(&content)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid status format"))
}

/// Parses the content of a /proc/<pid>/status file.
pub fn parse_proc_status(content: &str) -> Option<ProcStatus> {
    let mut name = None;
    let mut uid = None;
    let mut rss_kb = 0;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("Name:") {
            name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Uid:") {
            // Real, effective, saved, filesystem
            uid = v.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(v) = line.strip_prefix("VmRSS:") {
            rss_kb = parse_kb_value(v).unwrap_or(0);
        }
    }

    Some(ProcStatus {
        name: name?,
        uid: uid?,
        rss_kb,
    })
}
