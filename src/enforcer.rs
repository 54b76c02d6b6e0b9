//! Process termination and user notification.

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{NannyError, Result, SampleError, SignalError};
use crate::notifier::{EmailMessage, EmailSettings, Mailer};
use crate::process::ProcessSampler;
use crate::store::{Hostname, NotificationRecord, UserName, WhitelistStore};
use crate::usage::UserUsage;

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const INIT_PID: u32 = 1;

/// Delivers termination signals to single processes.
pub trait Signaller: Send + Sync {
    fn terminate(&self, pid: u32) -> std::result::Result<(), SignalError>;

    /// False once `pid` no longer exists.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Signals processes with `kill(2)`.
pub struct NixSignaller {
    signal: Signal,
}

impl NixSignaller {
    pub fn new(signal: Signal) -> Self {
        Self { signal }
    }
}

impl Signaller for NixSignaller {
    fn terminate(&self, pid: u32) -> std::result::Result<(), SignalError> {
        let raw = i32::try_from(pid).map_err(|_| SignalError::Other {
            pid,
            reason: "pid out of range".to_string(),
        })?;

        match kill(Pid::from_raw(raw), self.signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(SignalError::NoSuchProcess(pid)),
            Err(Errno::EPERM) => Err(SignalError::PermissionDenied(pid)),
            Err(e) => Err(SignalError::Other {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks for existence
        !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
    }
}

/// Parses a signal name such as `SIGTERM`, `TERM` or `sigkill`.
pub fn parse_signal(name: &str) -> std::result::Result<Signal, NannyError> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full)
        .map_err(|_| NannyError::InvalidArgument(format!("unknown signal '{name}'")))
}

/// Outcome of terminating one user's processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KillReport {
    pub user: String,
    /// PIDs that accepted the signal.
    pub signalled: Vec<u32>,
    /// PIDs that exited before they could be signalled.
    pub vanished: Vec<u32>,
    /// PIDs never signalled: init and node-nanny itself.
    pub skipped: Vec<u32>,
    pub failures: Vec<SignalError>,
}

impl KillReport {
    fn empty(user: &str) -> Self {
        Self {
            user: user.to_string(),
            ..Default::default()
        }
    }

    /// True when the user had no processes left to signal.
    pub fn is_noop(&self) -> bool {
        self.signalled.is_empty() && self.failures.is_empty()
    }

    /// True when at least one process accepted the signal.
    pub fn terminated_any(&self) -> bool {
        !self.signalled.is_empty()
    }

    /// `PartialEnforcementFailure` when some PIDs could not be signalled.
    pub fn partial_failure(&self) -> Option<NannyError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(NannyError::PartialEnforcementFailure {
                user: self.user.clone(),
                failures: self.failures.clone(),
            })
        }
    }
}

/// Executes termination decisions on this node.
pub struct Enforcer {
    sampler: Arc<dyn ProcessSampler>,
    signaller: Arc<dyn Signaller>,
    store: Arc<dyn WhitelistStore>,
    mailer: Option<(Arc<dyn Mailer>, EmailSettings)>,
    node: Hostname,
    settle: Duration,
}

impl Enforcer {
    pub fn new(
        sampler: Arc<dyn ProcessSampler>,
        signaller: Arc<dyn Signaller>,
        store: Arc<dyn WhitelistStore>,
        node: Hostname,
    ) -> Self {
        Self {
            sampler,
            signaller,
            store,
            mailer: None,
            node,
            settle: Duration::ZERO,
        }
    }

    /// Mails affected users through `mailer`.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>, settings: EmailSettings) -> Self {
        self.mailer = Some((mailer, settings));
        self
    }

    /// Waits up to `settle` for signalled processes to exit before `kill` returns.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn node(&self) -> &Hostname {
        &self.node
    }

    /// Signals every process owned by `user`.
    ///
    /// A user without processes is a no-op. Processes that exit before being
    /// signalled are tolerated; other failures are collected in the report.
    pub fn kill(&self, user: &str) -> Result<KillReport> {
        let processes = match self.sampler.processes_of(user) {
            Ok(processes) => processes,
            Err(SampleError::NotFound(_)) => {
                debug!("No running processes for {}, nothing to kill", user);
                return Ok(KillReport::empty(user));
            }
            Err(e) => return Err(e.into()),
        };

        let own_pid = std::process::id();
        let mut report = KillReport::empty(user);
        for process in &processes {
            if process.pid == INIT_PID || process.pid == own_pid {
                debug!("Not signalling protected process {} ({})", process.pid, process.name);
                report.skipped.push(process.pid);
                continue;
            }
            match self.signaller.terminate(process.pid) {
                Ok(()) => {
                    debug!("Signalled {} ({}) owned by {}", process.pid, process.name, user);
                    report.signalled.push(process.pid);
                }
                Err(SignalError::NoSuchProcess(pid)) => report.vanished.push(pid),
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        warn!(
            "Killed {} processes of {} ({} already gone, {} failed)",
            report.signalled.len(),
            user,
            report.vanished.len(),
            report.failures.len()
        );

        self.wait_for_exit(&report.signalled);
        Ok(report)
    }

    fn wait_for_exit(&self, pids: &[u32]) {
        if self.settle.is_zero() || pids.is_empty() {
            return;
        }

        let deadline = Instant::now() + self.settle;
        loop {
            let remaining = pids
                .iter()
                .filter(|pid| self.signaller.is_alive(**pid))
                .count();
            if remaining == 0 {
                return;
            }
            if Instant::now() >= deadline {
                debug!("{} signalled processes still running after {:?}", remaining, self.settle);
                return;
            }
            std::thread::sleep(SETTLE_POLL_INTERVAL);
        }
    }

    /// Records a notification for `user` and mails them.
    ///
    /// `total` is the system-wide usage at kill time. A failed delivery is
    /// logged only.
    pub fn notify(&self, user: &UserName, usage: &UserUsage, total: f64, limit: f64) -> Result<()> {
        let record = NotificationRecord::new(
            user.clone(),
            self.node.clone(),
            Utc::now(),
            i64::try_from(usage.rss_bytes).unwrap_or(i64::MAX),
            // Summed RSS counts shared pages more than once
            total.clamp(0.0, 100.0),
            limit,
        )?;
        self.store.record_notification(&record)?;

        if let Some((mailer, settings)) = &self.mailer {
            let message = EmailMessage::termination(
                settings,
                user,
                &self.node,
                usage.memory_share,
                record.percentage,
                limit,
            );
            match mailer.send(&message) {
                Ok(()) => info!("Notified {} at {}", user, message.to),
                Err(e) => warn!("Failed to notify {}: {}", user, e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::process::ProcessRecord;
    use crate::store::Database;
    use std::sync::Mutex;

    struct FixedSampler(Vec<ProcessRecord>);

    impl ProcessSampler for FixedSampler {
        fn snapshot(&self) -> std::result::Result<Vec<ProcessRecord>, SampleError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct ScriptedSignaller {
        gone: Vec<u32>,
        denied: Vec<u32>,
        sent: Mutex<Vec<u32>>,
    }

    impl Signaller for ScriptedSignaller {
        fn terminate(&self, pid: u32) -> std::result::Result<(), SignalError> {
            if self.gone.contains(&pid) {
                return Err(SignalError::NoSuchProcess(pid));
            }
            if self.denied.contains(&pid) {
                return Err(SignalError::PermissionDenied(pid));
            }
            self.sent.lock().unwrap().push(pid);
            Ok(())
        }

        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send(&self, _message: &EmailMessage) -> std::result::Result<(), NotifyError> {
            Err(NotifyError::Exit {
                program: "sendmail".to_string(),
                status: "exit status: 75".to_string(),
            })
        }
    }

    fn record(pid: u32, owner: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            owner: owner.to_string(),
            name: "job".to_string(),
            memory_share: 1.0,
            rss_bytes: 1024,
        }
    }

    fn enforcer(signaller: Arc<ScriptedSignaller>, store: Arc<Database>) -> Enforcer {
        let sampler = Arc::new(FixedSampler(vec![
            record(10, "alice"),
            record(11, "alice"),
            record(12, "alice"),
            record(20, "bob"),
        ]));
        Enforcer::new(sampler, signaller, store, Hostname::parse("node1").unwrap())
    }

    #[test]
    fn test_kill_signals_only_that_user() {
        let signaller = Arc::new(ScriptedSignaller::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let report = enforcer(signaller.clone(), store).kill("alice").unwrap();

        assert_eq!(report.signalled, vec![10, 11, 12]);
        assert!(report.partial_failure().is_none());
        assert_eq!(*signaller.sent.lock().unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn test_kill_unknown_user_is_noop() {
        let signaller = Arc::new(ScriptedSignaller::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let report = enforcer(signaller.clone(), store).kill("mallory").unwrap();

        assert!(report.is_noop());
        assert!(signaller.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_kill_tolerates_vanished_and_reports_failures() {
        let signaller = Arc::new(ScriptedSignaller {
            gone: vec![11],
            denied: vec![12],
            ..Default::default()
        });
        let store = Arc::new(Database::open_in_memory().unwrap());
        let report = enforcer(signaller, store).kill("alice").unwrap();

        assert_eq!(report.signalled, vec![10]);
        assert_eq!(report.vanished, vec![11]);
        assert_eq!(report.failures, vec![SignalError::PermissionDenied(12)]);
        assert!(matches!(
            report.partial_failure(),
            Some(NannyError::PartialEnforcementFailure { user, failures })
                if user == "alice" && failures.len() == 1
        ));
    }

    #[test]
    fn test_kill_never_signals_init_or_itself() {
        let own_pid = std::process::id();
        let sampler = Arc::new(FixedSampler(vec![
            record(1, "root"),
            record(own_pid, "root"),
            record(30, "root"),
        ]));
        let signaller = Arc::new(ScriptedSignaller::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let enforcer = Enforcer::new(
            sampler,
            signaller.clone(),
            store,
            Hostname::parse("node1").unwrap(),
        );

        let report = enforcer.kill("root").unwrap();
        assert_eq!(report.signalled, vec![30]);
        assert_eq!(report.skipped, vec![1, own_pid]);
        assert_eq!(*signaller.sent.lock().unwrap(), vec![30]);
    }

    #[test]
    fn test_kill_with_every_pid_denied_terminates_nothing() {
        let signaller = Arc::new(ScriptedSignaller {
            denied: vec![10, 11, 12],
            ..Default::default()
        });
        let store = Arc::new(Database::open_in_memory().unwrap());
        let report = enforcer(signaller, store).kill("alice").unwrap();

        assert!(!report.is_noop());
        assert!(!report.terminated_any());
        assert_eq!(report.failures.len(), 3);
        assert!(report.partial_failure().is_some());
    }

    #[test]
    fn test_notify_records_even_when_mail_fails() {
        let signaller = Arc::new(ScriptedSignaller::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let settings = EmailSettings {
            domain: "domain.com".to_string(),
            from: "root@domain.com".to_string(),
        };
        let enforcer =
            enforcer(signaller, store.clone()).with_mailer(Arc::new(FailingMailer), settings);

        let alice = UserName::parse("alice").unwrap();
        let usage = UserUsage {
            memory_share: 15.0,
            rss_bytes: 4096,
            process_count: 3,
        };
        enforcer.notify(&alice, &usage, 28.0, 20.0).unwrap();

        let history = store.notification_history(Some(&alice)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].memory, 4096);
        assert_eq!(history[0].percentage, 28.0);
        assert_eq!(history[0].limit, 20.0);
        assert_eq!(history[0].node.as_str(), "node1");
    }

    #[test]
    fn test_notify_clamps_total() {
        let signaller = Arc::new(ScriptedSignaller::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let enforcer = enforcer(signaller, store.clone());

        let alice = UserName::parse("alice").unwrap();
        enforcer
            .notify(&alice, &UserUsage::default(), 104.2, 20.0)
            .unwrap();
        assert_eq!(store.notification_history(None).unwrap()[0].percentage, 100.0);
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("kill").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal(" sigint ").unwrap(), Signal::SIGINT);
        assert!(matches!(
            parse_signal("SIGNOPE"),
            Err(NannyError::InvalidArgument(_))
        ));
    }
}
