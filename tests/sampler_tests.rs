//! Integration tests for /proc sampling.
//!
//! A fake procfs tree is built in a temporary directory so the sampler can be
//! exercised without depending on the processes of the test machine.

use node_nanny::error::SampleError;
use node_nanny::process::{ProcSampler, ProcessSampler};
use node_nanny::usage::aggregate;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_meminfo(root: &Path, total_kb: u64) {
    fs::write(
        root.join("meminfo"),
        format!("MemTotal:       {total_kb} kB\nMemFree:        1000 kB\n"),
    )
    .unwrap();
}

fn write_process(root: &Path, pid: u32, name: &str, uid: u32, rss_kb: Option<u64>) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    let mut status = format!("Name:\t{name}\nPid:\t{pid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\n");
    if let Some(rss) = rss_kb {
        status.push_str(&format!("VmRSS:\t{rss} kB\n"));
    }
    fs::write(dir.join("status"), status).unwrap();
}

#[test]
fn test_snapshot_reads_fake_proc() {
    let dir = TempDir::new().unwrap();
    write_meminfo(dir.path(), 1_000_000);
    write_process(dir.path(), 1, "init", 0, Some(10_000));
    write_process(dir.path(), 2, "kthreadd", 0, None);
    write_process(dir.path(), 300, "worker", 0, Some(240_000));

    let sampler = ProcSampler::new(dir.path(), None);
    let mut records = sampler.snapshot().unwrap();
    records.sort_by_key(|r| r.pid);

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "init");
    assert_eq!(records[0].owner, "root");
    assert!((records[0].memory_share - 1.0).abs() < 1e-9);
    assert_eq!(records[0].rss_bytes, 10_000 * 1024);
    assert_eq!(records[1].memory_share, 0.0);
    assert!((records[2].memory_share - 24.0).abs() < 1e-9);

    let snapshot = aggregate(&records);
    assert!((snapshot.total() - 25.0).abs() < 1e-9);
    assert_eq!(snapshot.user("root").unwrap().process_count, 3);
}

#[test]
fn test_snapshot_skips_unreadable_processes() {
    let dir = TempDir::new().unwrap();
    write_meminfo(dir.path(), 1_000_000);
    write_process(dir.path(), 10, "alive", 0, Some(1000));
    // Directory without a status file, as left by a process that just exited
    fs::create_dir(dir.path().join("11")).unwrap();
    // Garbage status
    fs::create_dir(dir.path().join("12")).unwrap();
    fs::write(dir.path().join("12").join("status"), "nonsense").unwrap();

    let records = ProcSampler::new(dir.path(), None).snapshot().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pid, 10);
}

#[test]
fn test_unknown_uid_is_reported_numerically() {
    let dir = TempDir::new().unwrap();
    write_meminfo(dir.path(), 1_000_000);
    write_process(dir.path(), 20, "ghost", 4_000_000_000, Some(1000));

    let records = ProcSampler::new(dir.path(), None).snapshot().unwrap();
    assert_eq!(records[0].owner, "4000000000");
}

#[test]
fn test_missing_meminfo_fails_snapshot() {
    let dir = TempDir::new().unwrap();
    write_process(dir.path(), 1, "init", 0, Some(1000));

    assert!(matches!(
        ProcSampler::new(dir.path(), None).snapshot(),
        Err(SampleError::Io { .. })
    ));
}

#[test]
fn test_processes_of() {
    let dir = TempDir::new().unwrap();
    write_meminfo(dir.path(), 1_000_000);
    write_process(dir.path(), 1, "init", 0, Some(1000));
    write_process(dir.path(), 2, "bash", 0, Some(2000));

    let sampler = ProcSampler::new(dir.path(), None);
    assert_eq!(sampler.processes_of("root").unwrap().len(), 2);
    assert!(matches!(
        sampler.processes_of("nobody-here"),
        Err(SampleError::NotFound(_))
    ));
}

#[test]
fn test_max_processes_caps_enumeration() {
    let dir = TempDir::new().unwrap();
    write_meminfo(dir.path(), 1_000_000);
    for pid in 1..=10 {
        write_process(dir.path(), pid, "job", 0, Some(100));
    }

    let records = ProcSampler::new(dir.path(), Some(4)).snapshot().unwrap();
    assert_eq!(records.len(), 4);
}
