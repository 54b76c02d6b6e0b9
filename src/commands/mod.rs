//! CLI command implementations for node-nanny.
//!
//! This module provides implementations for all CLI subcommands:
//! - `scan`: Run the memory guardian loop
//! - `kill`: Kill a user's processes immediately
//! - `history`: Notification history
//! - `whitelist`: List, add and remove whitelist entries
//! - `check`: System validation
//! - `config`: Configuration file generation

pub mod check;
pub mod config;
pub mod history;
pub mod kill;
pub mod scan;
pub mod whitelist;

use std::sync::Arc;
use tracing::debug;

use node_nanny::config::Config;
use node_nanny::enforcer::{parse_signal, Enforcer, NixSignaller};
use node_nanny::notifier::SendmailMailer;
use node_nanny::process::ProcSampler;
use node_nanny::store::{Database, Hostname, UserName};

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use history::command_history;
pub use kill::command_kill;
pub use scan::command_scan;
pub use whitelist::{command_add, command_remove, command_whitelist};

/// Opens the configured database, creating it on first use.
fn open_database(config: &Config) -> Result<Arc<Database>, Box<dyn std::error::Error>> {
    let path = config.database_path();
    let database = Database::open(&path)
        .map_err(|e| format!("Cannot open database {}: {}", path.display(), e))?;
    debug!("Opened database at {}", path.display());
    Ok(Arc::new(database))
}

fn proc_sampler(config: &Config) -> Arc<ProcSampler> {
    Arc::new(ProcSampler::new("/proc", config.max_processes))
}

/// Builds the enforcer for this node from the effective configuration.
fn build_enforcer(
    config: &Config,
    sampler: Arc<ProcSampler>,
    store: Arc<Database>,
    node: &Hostname,
    notify_by_email: bool,
) -> Result<Enforcer, Box<dyn std::error::Error>> {
    let signal = parse_signal(config.kill_signal())?;
    let mut enforcer = Enforcer::new(
        sampler,
        Arc::new(NixSignaller::new(signal)),
        store,
        node.clone(),
    )
    .with_settle(config.kill_settle());

    if notify_by_email {
        if let Some(settings) = config.email_settings(node) {
            enforcer =
                enforcer.with_mailer(Arc::new(SendmailMailer::new(config.sendmail_path())), settings);
        }
    }

    Ok(enforcer)
}

fn parse_user(user: &str) -> Result<UserName, Box<dyn std::error::Error>> {
    UserName::parse(user).map_err(|e| format!("Invalid user '{}': {}", user, e).into())
}

/// Explicit node, or this node unless the global flag is set.
fn resolve_node(
    config: &Config,
    node: Option<&str>,
    global: bool,
) -> Result<Option<Hostname>, Box<dyn std::error::Error>> {
    match (node, global) {
        (Some(name), _) => Ok(Some(
            Hostname::parse(name).map_err(|e| format!("Invalid node '{}': {}", name, e))?,
        )),
        (None, true) => Ok(None),
        (None, false) => Ok(Some(config.node()?)),
    }
}
