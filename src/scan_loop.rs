//! The scan-decide-enforce control loop.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::enforcer::Enforcer;
use crate::error::{NannyError, Result};
use crate::policy::{Decision, EnforcementPolicy, Thresholds};
use crate::process::ProcessSampler;
use crate::stats::ScanStats;
use crate::store::{UserName, WhitelistStore};
use crate::usage::{aggregate, UsageSnapshot};

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// System-wide usage when the tick started.
    pub total: f64,
    pub decision: Decision,
    /// Users whose processes were signalled, in kill order.
    pub killed: Vec<String>,
    /// System-wide usage after enforcement, equal to `total` without it.
    pub final_total: f64,
}

impl TickReport {
    /// False only when enforcement ran out of candidates above the limit.
    pub fn limit_restored(&self, limit: f64) -> bool {
        self.decision != Decision::Enforce || self.final_total <= limit
    }
}

pub struct ScanLoop {
    sampler: Arc<dyn ProcessSampler>,
    store: Arc<dyn WhitelistStore>,
    enforcer: Enforcer,
    policy: EnforcementPolicy,
    frequency: Duration,
    stats: Arc<ScanStats>,
}

impl ScanLoop {
    pub fn new(
        sampler: Arc<dyn ProcessSampler>,
        store: Arc<dyn WhitelistStore>,
        enforcer: Enforcer,
        thresholds: Thresholds,
        frequency: Duration,
    ) -> Self {
        Self {
            sampler,
            store,
            enforcer,
            policy: EnforcementPolicy::new(thresholds),
            frequency,
            stats: Arc::new(ScanStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.policy
    }

    /// Runs ticks every `frequency` until `shutdown` resolves. A tick in
    /// progress always completes; failed ticks are logged and retried on the
    /// next one.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Scanning {} every {:?} (limit {:.1}%, floor {:.1}%, wait {:?})",
            self.enforcer.node(),
            self.frequency,
            self.policy.thresholds().memory_limit,
            self.policy.thresholds().min_usage,
            self.policy.thresholds().wait
        );

        let mut last_tick: Option<Instant> = None;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping scan loop");
                    break;
                }
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            let elapsed = last_tick.map_or(Duration::ZERO, |t| now.duration_since(t));
            last_tick = Some(now);

            if let Err(e) = self.tick(elapsed) {
                self.stats.record_tick_failure();
                error!("Scan tick failed: {}", e);
            }
        }
    }

    /// One pass of sample, aggregate, decide and, when due, enforce.
    /// `elapsed` is the time since the previous tick.
    #[instrument(skip(self), fields(node = %self.enforcer.node()))]
    pub fn tick(&mut self, elapsed: Duration) -> Result<TickReport> {
        let started = Instant::now();
        let records = self.sampler.snapshot()?;
        let snapshot = aggregate(&records);
        let total = snapshot.total();
        let limit = self.policy.thresholds().memory_limit;

        let decision = self.policy.observe(total, elapsed);
        let mut report = TickReport {
            total,
            decision,
            killed: Vec::new(),
            final_total: total,
        };

        match decision {
            Decision::WithinLimit => {
                debug!("Memory usage {:.2}% within limit {:.2}%", total, limit);
            }
            Decision::Waiting { elapsed_over } => {
                info!(
                    "Memory usage {:.2}% above limit {:.2}% for {:?} of {:?}",
                    total,
                    limit,
                    elapsed_over,
                    self.policy.thresholds().wait
                );
            }
            Decision::Enforce => {
                self.stats.record_enforcement_round();
                let outcome = self.enforce(snapshot, &mut report);
                self.policy.complete_round();
                outcome?;
            }
        }

        self.stats.record_tick(
            records.len() as u64,
            total,
            started.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(report)
    }

    fn enforce(&self, snapshot: UsageSnapshot, report: &mut TickReport) -> Result<()> {
        let limit = self.policy.thresholds().memory_limit;
        let exempt = self
            .store
            .active_exemptions(self.enforcer.node(), Utc::now())?;
        let mut round = self.policy.select_candidates(&snapshot, &exempt);

        warn!(
            "Memory usage {:.2}% stayed above limit {:.2}%, enforcing against {} candidates ({} whitelisted)",
            snapshot.total(),
            limit,
            round.candidates().count(),
            exempt.len()
        );

        let mut current = snapshot;
        while let Some(candidate) = round.next_target(current.total()) {
            let usage_at_kill = current.user(&candidate.user).cloned().unwrap_or_default();
            let total_at_kill = current.total();

            let kill = self.enforcer.kill(&candidate.user)?;
            if let Some(e) = kill.partial_failure() {
                warn!("{}", e);
            }

            self.stats.record_signal_failures(kill.failures.len() as u64);

            if kill.terminated_any() {
                report.killed.push(candidate.user.clone());
                self.stats.record_user_killed();

                match UserName::parse(&candidate.user) {
                    Ok(user) => {
                        if let Err(e) = self.enforcer.notify(&user, &usage_at_kill, total_at_kill, limit) {
                            warn!("Failed to record notification for {}: {}", candidate.user, e);
                        }
                    }
                    Err(e) => warn!("Not notifying {}: {}", candidate.user, e),
                }
            }

            current = aggregate(&self.sampler.snapshot()?);
            debug!(
                "Memory usage {:.2}% after killing {}",
                current.total(),
                candidate.user
            );
        }

        report.final_total = current.total();
        if current.total() > limit {
            self.stats.record_limit_not_restored();
            warn!(
                "{}",
                NannyError::LimitNotRestored {
                    total: current.total(),
                    limit,
                }
            );
        } else {
            info!(
                "Memory usage {:.2}% restored below limit {:.2}%",
                current.total(),
                limit
            );
        }

        Ok(())
    }
}
