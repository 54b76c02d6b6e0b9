//! Kill command implementation.
//!
//! Terminates every process of one user immediately, bypassing the policy.

use node_nanny::config::Config;
use node_nanny::process::ProcessSampler;
use node_nanny::usage::aggregate;

use super::{build_enforcer, open_database, parse_user, proc_sampler};

/// Kills all processes of `user` and notifies them unless `quiet`.
pub fn command_kill(config: &Config, user: &str, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    let user = parse_user(user)?;
    let node = config.node()?;
    let sampler = proc_sampler(config);
    let store = open_database(config)?;

    // Usage is captured before the kill so the notification reflects it
    let snapshot = aggregate(&sampler.snapshot()?);
    let usage = snapshot.user(user.as_str()).cloned().unwrap_or_default();

    let enforcer = build_enforcer(config, sampler, store, &node, !quiet)?;
    let report = enforcer.kill(user.as_str())?;

    if report.is_noop() {
        println!("ℹ️  No running processes found for {}", user);
        return Ok(());
    }

    if report.terminated_any() {
        println!(
            "✅ Signalled {} processes of {} on {}",
            report.signalled.len(),
            user,
            node
        );
    } else {
        println!("❌ No process of {} on {} could be signalled", user, node);
    }
    if !report.vanished.is_empty() {
        println!("   {} processes had already exited", report.vanished.len());
    }
    if let Some(e) = report.partial_failure() {
        println!("   ⚠️  {}", e);
        for failure in &report.failures {
            println!("      - {}", failure);
        }
    }

    if !quiet && report.terminated_any() {
        enforcer.notify(
            &user,
            &usage,
            snapshot.total(),
            config.thresholds().memory_limit,
        )?;
        println!("📧 Notification recorded for {}", user);
    }

    Ok(())
}
