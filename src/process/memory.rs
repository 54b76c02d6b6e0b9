//! Memory parsing utilities for reading system memory totals from /proc.

use std::fs;
use std::path::Path;

use crate::error::SampleError;

/// Parses kilobyte values from /proc file lines.
pub fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Reads MemTotal from /proc/meminfo and returns it in KB.
pub fn read_mem_total_kb(meminfo: &Path) -> Result<u64, SampleError> {
    let content = fs::read_to_string(meminfo).map_err(|source| SampleError::Io {
        path: meminfo.display().to_string(),
        source,
    })?;

    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(parse_kb_value)
        .filter(|kb| *kb > 0)
        .ok_or_else(|| SampleError::Format {
            path: meminfo.display().to_string(),
            reason: "missing or zero MemTotal".to_string(),
        })
}

/// Share of total memory used by `rss_kb`, in percent.
pub fn memory_share(rss_kb: u64, mem_total_kb: u64) -> f64 {
    if mem_total_kb == 0 {
        return 0.0;
    }
    rss_kb as f64 / mem_total_kb as f64 * 100.0
}
