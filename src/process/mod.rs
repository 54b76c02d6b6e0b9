//! Process-related modules for sampling per-process memory from /proc.
//!
//! This module provides:
//! - `memory`: MemTotal parsing and memory share calculation
//! - `scanner`: Process discovery and /proc/<pid>/status parsing
//! - `sampler`: Snapshots of all processes attributed to their owners

pub mod memory;
pub mod sampler;
pub mod scanner;

// Re-export commonly used types
pub use memory::{memory_share, parse_kb_value, read_mem_total_kb};
pub use sampler::{ProcSampler, ProcessRecord, ProcessSampler, UserResolver};
pub use scanner::{collect_proc_entries, parse_proc_status, read_proc_status, ProcEntry, ProcStatus};
