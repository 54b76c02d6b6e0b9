//! Runtime statistics for the scan loop.
//!
//! Collected while `scan` runs and printed as a summary table on shutdown.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Running statistics for a single measurement.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (last, avg, max, min, count)
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Counters and samples gathered by the scan loop.
pub struct ScanStats {
    pub sampled_processes: Stat,
    pub tick_duration_ms: Stat,
    pub memory_usage_percent: Stat,

    pub ticks: AtomicU64,
    pub tick_failures: AtomicU64,

    pub enforcement_rounds: AtomicU64,
    pub users_killed: AtomicU64,
    pub signal_failures: AtomicU64,
    pub limit_not_restored: AtomicU64,

    pub start_time: Instant,
}

impl Default for ScanStats {
    fn default() -> Self {
        Self {
            sampled_processes: Stat::default(),
            tick_duration_ms: Stat::default(),
            memory_usage_percent: Stat::default(),
            ticks: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            enforcement_rounds: AtomicU64::new(0),
            users_killed: AtomicU64::new(0),
            signal_failures: AtomicU64::new(0),
            limit_not_restored: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ScanStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_tick(&self, processes: u64, usage_percent: f64, duration_ms: f64) {
        self.sampled_processes.add_sample(processes as f64);
        self.memory_usage_percent.add_sample(usage_percent);
        self.tick_duration_ms.add_sample(duration_ms);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_failure(&self) {
        self.tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enforcement_round(&self) {
        self.enforcement_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_user_killed(&self) {
        self.users_killed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal_failures(&self, failures: u64) {
        self.signal_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_limit_not_restored(&self) {
        self.limit_not_restored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_tick_success_rate(&self) -> f64 {
        let ticks = self.ticks.load(Ordering::Relaxed);
        let failures = self.tick_failures.load(Ordering::Relaxed);
        let total = ticks + failures;
        if total == 0 {
            100.0
        } else {
            (ticks as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let rows = [
            ("sampled processes", self.sampled_processes.snapshot()),
            ("memory usage (%)", self.memory_usage_percent.snapshot()),
            ("tick duration (ms)", self.tick_duration_ms.snapshot()),
        ];

        let left_col = 22usize;
        let col_w = 10usize;

        let mut out = String::new();

        writeln!(out, "SCAN LOOP STATISTICS").ok();
        writeln!(out, "====================").ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 4 * (col_w + 3))).ok();

        for (label, (cur, avg, max, min, _)) in rows {
            writeln!(
                out,
                "{:left$} | {:>col$.2} | {:>col$.2} | {:>col$.2} | {:>col$.2}",
                label,
                cur,
                avg,
                max,
                min,
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(
            out,
            "ticks: {}  failed: {}  success rate: {:.1}%  uptime: {}s",
            self.ticks.load(Ordering::Relaxed),
            self.tick_failures.load(Ordering::Relaxed),
            self.get_tick_success_rate(),
            self.get_uptime_seconds()
        )
        .ok();
        writeln!(
            out,
            "enforcement rounds: {}  users killed: {}  signal failures: {}  limit not restored: {}",
            self.enforcement_rounds.load(Ordering::Relaxed),
            self.users_killed.load(Ordering::Relaxed),
            self.signal_failures.load(Ordering::Relaxed),
            self.limit_not_restored.load(Ordering::Relaxed)
        )
        .ok();

        out
    }
}
