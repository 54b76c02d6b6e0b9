//! Threshold and grace-window decision logic.
//!
//! The policy is fed the system total once per scan tick. It tracks how long
//! usage has stayed above the limit and, once that exceeds the grace window,
//! hands out an [`EnforcementRound`]: the eligible users ordered so the
//! heaviest is targeted first.

use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::usage::UsageSnapshot;

/// Limits that drive the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// System-wide usage (percent) above which the node is over the limit.
    pub memory_limit: f64,
    /// Users at or below this usage (percent) are never targeted.
    pub min_usage: f64,
    /// How long usage may stay above the limit before enforcement.
    pub wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    Normal,
    OverLimit,
    Enforcing,
}

/// Outcome of feeding one tick into the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    WithinLimit,
    Waiting { elapsed_over: Duration },
    Enforce,
}

/// A user eligible for termination.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub user: String,
    pub usage: f64,
}

pub struct EnforcementPolicy {
    thresholds: Thresholds,
    state: PolicyState,
    elapsed_over: Duration,
}

impl EnforcementPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: PolicyState::Normal,
            elapsed_over: Duration::ZERO,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    /// Time spent continuously over the limit, counted on tick boundaries.
    pub fn elapsed_over(&self) -> Duration {
        self.elapsed_over
    }

    /// Feeds the system total for one tick. `elapsed` is the time since the
    /// previous tick.
    pub fn observe(&mut self, total: f64, elapsed: Duration) -> Decision {
        if total <= self.thresholds.memory_limit {
            if self.state != PolicyState::Normal {
                debug!(
                    "Usage {:.2}% back within limit {:.2}%, resetting grace timer",
                    total, self.thresholds.memory_limit
                );
            }
            self.reset();
            return Decision::WithinLimit;
        }

        self.elapsed_over += elapsed;
        if self.elapsed_over > self.thresholds.wait {
            self.state = PolicyState::Enforcing;
            Decision::Enforce
        } else {
            self.state = PolicyState::OverLimit;
            Decision::Waiting {
                elapsed_over: self.elapsed_over,
            }
        }
    }

    /// Builds the kill order for the current snapshot. Users at or below the
    /// floor and users in `exempt` are left out.
    pub fn select_candidates(
        &self,
        snapshot: &UsageSnapshot,
        exempt: &HashSet<String>,
    ) -> EnforcementRound {
        let mut queue: Vec<Candidate> = snapshot
            .users()
            .filter(|(_, usage)| usage.memory_share > self.thresholds.min_usage)
            .filter(|(user, _)| !exempt.contains(*user))
            .map(|(user, usage)| Candidate {
                user: user.to_string(),
                usage: usage.memory_share,
            })
            .collect();

        // Ascending by usage; equal usage pops the alphabetically first user
        queue.sort_by(|a, b| {
            a.usage
                .total_cmp(&b.usage)
                .then_with(|| b.user.cmp(&a.user))
        });

        EnforcementRound {
            queue,
            memory_limit: self.thresholds.memory_limit,
        }
    }

    /// Ends an enforcement round. The grace timer restarts whatever the outcome.
    pub fn complete_round(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.state = PolicyState::Normal;
        self.elapsed_over = Duration::ZERO;
    }
}

/// Candidates for one enforcement pass, consumed heaviest first.
#[derive(Debug, Clone)]
pub struct EnforcementRound {
    queue: Vec<Candidate>,
    memory_limit: f64,
}

impl EnforcementRound {
    /// Remaining candidates in kill order.
    pub fn candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.queue.iter().rev()
    }

    /// Next user to terminate given the freshly measured total, or `None`
    /// once the total is within the limit or no candidates remain.
    pub fn next_target(&mut self, current_total: f64) -> Option<Candidate> {
        if current_total <= self.memory_limit {
            return None;
        }
        self.queue.pop()
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessRecord;
    use crate::usage::aggregate;

    fn thresholds() -> Thresholds {
        Thresholds {
            memory_limit: 20.0,
            min_usage: 5.0,
            wait: Duration::from_secs(5),
        }
    }

    fn snapshot(users: &[(&str, f64)]) -> UsageSnapshot {
        let records: Vec<ProcessRecord> = users
            .iter()
            .enumerate()
            .map(|(i, (owner, share))| ProcessRecord {
                pid: i as u32 + 100,
                owner: owner.to_string(),
                name: "job".to_string(),
                memory_share: *share,
                rss_bytes: 0,
            })
            .collect();
        aggregate(&records)
    }

    fn order(round: &EnforcementRound) -> Vec<&str> {
        round.candidates().map(|c| c.user.as_str()).collect()
    }

    #[test]
    fn test_stays_over_limit_within_grace_window() {
        let mut policy = EnforcementPolicy::new(thresholds());
        for _ in 0..4 {
            let decision = policy.observe(25.0, Duration::from_secs(1));
            assert!(matches!(decision, Decision::Waiting { .. }));
        }
        assert_eq!(policy.state(), PolicyState::OverLimit);
        assert_eq!(policy.elapsed_over(), Duration::from_secs(4));
    }

    #[test]
    fn test_enforces_after_grace_window() {
        let mut policy = EnforcementPolicy::new(thresholds());
        for _ in 0..5 {
            policy.observe(25.0, Duration::from_secs(1));
        }
        // Exactly at the wait is not yet past it
        assert_eq!(policy.state(), PolicyState::OverLimit);

        assert_eq!(policy.observe(25.0, Duration::from_secs(1)), Decision::Enforce);
        assert_eq!(policy.state(), PolicyState::Enforcing);
    }

    #[test]
    fn test_dip_below_limit_resets_grace_timer() {
        let mut policy = EnforcementPolicy::new(thresholds());
        policy.observe(25.0, Duration::from_secs(4));
        assert_eq!(policy.observe(20.0, Duration::from_secs(1)), Decision::WithinLimit);
        assert_eq!(policy.state(), PolicyState::Normal);
        assert_eq!(policy.elapsed_over(), Duration::ZERO);

        // Needs a full grace window again
        assert!(matches!(
            policy.observe(25.0, Duration::from_secs(4)),
            Decision::Waiting { .. }
        ));
    }

    #[test]
    fn test_zero_usage_is_normal() {
        let mut policy = EnforcementPolicy::new(thresholds());
        assert_eq!(policy.observe(0.0, Duration::from_secs(60)), Decision::WithinLimit);
        assert_eq!(policy.state(), PolicyState::Normal);
    }

    #[test]
    fn test_candidates_heaviest_first_and_floor_excluded() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("alice", 15.0), ("bob", 10.0), ("carol", 3.0)]);
        let round = policy.select_candidates(&snap, &HashSet::new());
        assert_eq!(order(&round), vec!["alice", "bob"]);
    }

    #[test]
    fn test_floor_is_inclusive() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("alice", 25.0), ("dave", 5.0)]);
        let round = policy.select_candidates(&snap, &HashSet::new());
        assert_eq!(order(&round), vec!["alice"]);
    }

    #[test]
    fn test_exempt_users_excluded() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("alice", 15.0), ("bob", 10.0), ("carol", 3.0)]);
        let exempt: HashSet<String> = ["alice".to_string()].into_iter().collect();
        let round = policy.select_candidates(&snap, &exempt);
        assert_eq!(order(&round), vec!["bob"]);
    }

    #[test]
    fn test_ties_broken_by_name() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("zoe", 10.0), ("adam", 10.0), ("mia", 12.0)]);
        let round = policy.select_candidates(&snap, &HashSet::new());
        assert_eq!(order(&round), vec!["mia", "adam", "zoe"]);
    }

    #[test]
    fn test_round_stops_once_within_limit() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("alice", 15.0), ("bob", 10.0), ("carol", 3.0)]);
        let mut round = policy.select_candidates(&snap, &HashSet::new());

        let first = round.next_target(28.0).unwrap();
        assert_eq!(first.user, "alice");
        // Killing alice dropped the total to 13%
        assert!(round.next_target(13.0).is_none());
        assert!(!round.is_exhausted());
    }

    #[test]
    fn test_round_exhaustion() {
        let policy = EnforcementPolicy::new(thresholds());
        let snap = snapshot(&[("alice", 15.0)]);
        let mut round = policy.select_candidates(&snap, &HashSet::new());
        assert_eq!(round.next_target(30.0).unwrap().user, "alice");
        assert!(round.next_target(30.0).is_none());
        assert!(round.is_exhausted());
    }

    #[test]
    fn test_complete_round_resets() {
        let mut policy = EnforcementPolicy::new(thresholds());
        policy.observe(25.0, Duration::from_secs(10));
        assert_eq!(policy.state(), PolicyState::Enforcing);
        policy.complete_round();
        assert_eq!(policy.state(), PolicyState::Normal);
        assert_eq!(policy.elapsed_over(), Duration::ZERO);
    }
}
