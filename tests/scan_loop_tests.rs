//! Integration tests for the scan-decide-enforce loop.
//!
//! A simulated node holds the process table; signalling a process removes it,
//! so re-sampling after a kill observes the freed memory.

use chrono::Utc;
use node_nanny::enforcer::{Enforcer, Signaller};
use node_nanny::error::{NotifyError, SampleError, SignalError};
use node_nanny::notifier::{EmailMessage, EmailSettings, Mailer};
use node_nanny::policy::{Decision, PolicyState, Thresholds};
use node_nanny::process::{ProcessRecord, ProcessSampler};
use node_nanny::scan_loop::ScanLoop;
use node_nanny::store::{Database, Hostname, UserName, WhitelistStore};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct SimulatedNode {
    processes: Mutex<Vec<ProcessRecord>>,
    killed: Mutex<Vec<u32>>,
    protected: Vec<u32>,
}

impl SimulatedNode {
    fn with_users(users: &[(&str, &[f64])]) -> Self {
        let mut processes = Vec::new();
        let mut pid = 100;
        for (owner, shares) in users {
            for share in *shares {
                processes.push(ProcessRecord {
                    pid,
                    owner: owner.to_string(),
                    name: "job".to_string(),
                    memory_share: *share,
                    rss_bytes: (*share * 1024.0 * 1024.0) as u64,
                });
                pid += 1;
            }
        }
        Self {
            processes: Mutex::new(processes),
            ..Default::default()
        }
    }

    fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }

    fn owners_alive(&self) -> Vec<String> {
        let mut owners: Vec<String> = self
            .processes
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.owner.clone())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }
}

struct NodeSampler(Arc<SimulatedNode>);

impl ProcessSampler for NodeSampler {
    fn snapshot(&self) -> Result<Vec<ProcessRecord>, SampleError> {
        Ok(self.0.processes.lock().unwrap().clone())
    }
}

struct NodeSignaller(Arc<SimulatedNode>);

impl Signaller for NodeSignaller {
    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        if self.0.protected.contains(&pid) {
            return Err(SignalError::PermissionDenied(pid));
        }
        let mut processes = self.0.processes.lock().unwrap();
        let before = processes.len();
        processes.retain(|p| p.pid != pid);
        if processes.len() == before {
            return Err(SignalError::NoSuchProcess(pid));
        }
        self.0.killed.lock().unwrap().push(pid);
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.0.processes.lock().unwrap().iter().any(|p| p.pid == pid)
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl Mailer for RecordingMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct Harness {
    node: Arc<SimulatedNode>,
    store: Arc<Database>,
    mailer: Arc<RecordingMailer>,
    scan_loop: ScanLoop,
}

fn thresholds() -> Thresholds {
    Thresholds {
        memory_limit: 20.0,
        min_usage: 5.0,
        wait: Duration::from_secs(5),
    }
}

fn harness(node: SimulatedNode) -> Harness {
    let node = Arc::new(node);
    let store = Arc::new(Database::open_in_memory().unwrap());
    let mailer = Arc::new(RecordingMailer::default());
    let sampler = Arc::new(NodeSampler(node.clone()));

    let enforcer = Enforcer::new(
        sampler.clone(),
        Arc::new(NodeSignaller(node.clone())),
        store.clone(),
        Hostname::parse("node1").unwrap(),
    )
    .with_mailer(
        mailer.clone(),
        EmailSettings {
            domain: "domain.com".to_string(),
            from: "node-nanny@domain.com".to_string(),
        },
    )
    .with_settle(Duration::from_millis(200));

    let scan_loop = ScanLoop::new(
        sampler,
        store.clone(),
        enforcer,
        thresholds(),
        Duration::from_millis(10),
    );

    Harness {
        node,
        store,
        mailer,
        scan_loop,
    }
}

fn three_users() -> SimulatedNode {
    // alice 15%, bob 10%, carol 3%
    SimulatedNode::with_users(&[
        ("alice", &[10.0, 5.0]),
        ("bob", &[6.0, 4.0]),
        ("carol", &[3.0]),
    ])
}

#[test]
fn test_no_kills_within_grace_window() {
    let mut h = harness(three_users());

    for _ in 0..4 {
        let report = h.scan_loop.tick(Duration::from_secs(1)).unwrap();
        assert!(matches!(report.decision, Decision::Waiting { .. }));
        assert!(report.killed.is_empty());
    }

    assert_eq!(h.scan_loop.policy().state(), PolicyState::OverLimit);
    assert!(h.node.killed().is_empty());
}

#[test]
fn test_heaviest_user_killed_after_grace_window() {
    let mut h = harness(three_users());

    for _ in 0..5 {
        h.scan_loop.tick(Duration::from_secs(1)).unwrap();
    }
    let report = h.scan_loop.tick(Duration::from_secs(1)).unwrap();

    assert_eq!(report.decision, Decision::Enforce);
    assert_eq!(report.killed, vec!["alice".to_string()]);
    assert!((report.total - 28.0).abs() < 1e-9);
    assert!((report.final_total - 13.0).abs() < 1e-9);
    assert!(report.limit_restored(20.0));

    // bob and carol untouched
    assert_eq!(h.node.owners_alive(), vec!["bob", "carol"]);
    assert_eq!(h.node.killed(), vec![100, 101]);

    // Round complete, grace timer restarted
    assert_eq!(h.scan_loop.policy().state(), PolicyState::Normal);
    assert_eq!(h.scan_loop.policy().elapsed_over(), Duration::ZERO);
}

#[test]
fn test_kill_is_recorded_and_mailed() {
    let mut h = harness(three_users());
    h.scan_loop.tick(Duration::from_secs(6)).unwrap();

    let history = h.store.notification_history(None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user.as_str(), "alice");
    assert_eq!(history[0].node.as_str(), "node1");
    assert!((history[0].percentage - 28.0).abs() < 1e-9);
    assert_eq!(history[0].limit, 20.0);

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@domain.com");
}

#[test]
fn test_whitelisted_user_is_spared() {
    let mut h = harness(three_users());
    h.store
        .add(&UserName::parse("alice").unwrap(), None, None, true, Utc::now())
        .unwrap();

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();

    assert_eq!(report.killed, vec!["bob".to_string()]);
    assert_eq!(h.node.owners_alive(), vec!["alice", "carol"]);
    assert!((report.final_total - 18.0).abs() < 1e-9);
    assert!(report.limit_restored(20.0));
}

#[test]
fn test_all_candidates_whitelisted() {
    let mut h = harness(SimulatedNode::with_users(&[("alice", &[30.0])]));
    h.store
        .add(
            &UserName::parse("alice").unwrap(),
            Some(&Hostname::parse("node1").unwrap()),
            None,
            false,
            Utc::now(),
        )
        .unwrap();

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();
    assert_eq!(report.decision, Decision::Enforce);
    assert!(report.killed.is_empty());
    assert!(h.node.killed().is_empty());
    // No stuck state
    assert_eq!(h.scan_loop.policy().state(), PolicyState::Normal);
}

#[test]
fn test_users_below_floor_never_killed() {
    // Many small users can exceed the limit together
    let mut h = harness(SimulatedNode::with_users(&[
        ("u1", &[4.0]),
        ("u2", &[4.0]),
        ("u3", &[4.0]),
        ("u4", &[4.0]),
        ("u5", &[5.0]),
        ("u6", &[6.0]),
    ]));

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();
    assert_eq!(report.killed, vec!["u6".to_string()]);
    assert!((report.final_total - 21.0).abs() < 1e-9);
    assert!(!report.limit_restored(20.0));
    assert_eq!(
        h.scan_loop
            .stats()
            .limit_not_restored
            .load(Ordering::Relaxed),
        1
    );
}

#[test]
fn test_partial_failure_does_not_stop_enforcement() {
    let mut node = three_users();
    // One of alice's processes cannot be signalled
    node.protected = vec![100];
    let mut h = harness(node);

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();

    // alice's 10% survives, so bob is next
    assert_eq!(report.killed, vec!["alice".to_string(), "bob".to_string()]);
    assert!((report.final_total - 13.0).abs() < 1e-9);
    assert_eq!(
        h.scan_loop.stats().signal_failures.load(Ordering::Relaxed),
        1
    );
}

#[test]
fn test_user_with_every_pid_denied_is_not_reported_killed() {
    let mut node = SimulatedNode::with_users(&[("alice", &[20.0, 10.0])]);
    node.protected = vec![100, 101];
    let mut h = harness(node);

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();

    assert!(report.killed.is_empty());
    assert!((report.final_total - 30.0).abs() < 1e-9);
    assert!(h.store.notification_history(None).unwrap().is_empty());
    assert!(h.mailer.sent.lock().unwrap().is_empty());

    let stats = h.scan_loop.stats();
    assert_eq!(stats.users_killed.load(Ordering::Relaxed), 0);
    assert_eq!(stats.signal_failures.load(Ordering::Relaxed), 2);
    assert_eq!(stats.limit_not_restored.load(Ordering::Relaxed), 1);
}

#[test]
fn test_guardian_and_init_are_never_signalled() {
    let own_pid = std::process::id();
    let job = |pid: u32, owner: &str, share: f64| ProcessRecord {
        pid,
        owner: owner.to_string(),
        name: "job".to_string(),
        memory_share: share,
        rss_bytes: (share * 1024.0 * 1024.0) as u64,
    };
    // root is the heaviest user and owns this very process
    let node = SimulatedNode {
        processes: Mutex::new(vec![
            job(1, "root", 10.0),
            job(own_pid, "root", 20.0),
            job(500, "bob", 6.0),
        ]),
        ..Default::default()
    };
    let mut h = harness(node);

    let report = h.scan_loop.tick(Duration::from_secs(6)).unwrap();

    assert_eq!(report.killed, vec!["bob".to_string()]);
    assert_eq!(h.node.killed(), vec![500]);
    assert_eq!(h.node.owners_alive(), vec!["root"]);

    let history = h.store.notification_history(None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user.as_str(), "bob");
}

#[test]
fn test_dip_resets_grace_window() {
    let mut h = harness(three_users());

    h.scan_loop.tick(Duration::from_secs(4)).unwrap();

    // bob's jobs finish and usage dips below the limit
    h.node
        .processes
        .lock()
        .unwrap()
        .retain(|p| p.owner != "bob");
    let report = h.scan_loop.tick(Duration::from_secs(1)).unwrap();
    assert_eq!(report.decision, Decision::WithinLimit);
    assert_eq!(h.scan_loop.policy().elapsed_over(), Duration::ZERO);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness(SimulatedNode::with_users(&[("alice", &[1.0])]));
    let stats = h.scan_loop.stats();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(h.scan_loop.run(async {
        let _ = rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scan loop did not stop")
        .unwrap();

    assert!(stats.ticks.load(Ordering::Relaxed) >= 1);
    assert_eq!(stats.users_killed.load(Ordering::Relaxed), 0);
}
