//! Whitelist command implementations.
//!
//! Lists, adds and removes whitelist entries.

use chrono::{Duration, Utc};

use node_nanny::config::Config;
use node_nanny::store::WhitelistStore;

use super::{open_database, parse_user, resolve_node};

/// Prints every active whitelist entry.
pub fn command_whitelist(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_database(config)?;
    let entries = store.active_entries(Utc::now())?;

    if entries.is_empty() {
        println!("No active whitelist entries");
        return Ok(());
    }

    println!(
        "{:<16} {:<24} {:<20} {:<20}",
        "USER", "NODE", "START", "END"
    );
    println!("{}", "-".repeat(83));

    for entry in &entries {
        let node = match &entry.node {
            Some(node) => node.as_str(),
            None => "(global)",
        };
        println!(
            "{:<16} {:<24} {:<20} {:<20}",
            entry.user.as_str(),
            node,
            entry.start_time.format("%Y-%m-%d %H:%M:%S"),
            entry.end_time.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Whitelists `user` on `node` (this host by default) or globally.
pub fn command_add(
    config: &Config,
    user: &str,
    duration_secs: Option<i64>,
    node: Option<&str>,
    global: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = parse_user(user)?;
    let node = resolve_node(config, node, global)?;
    let duration = duration_secs
        .map(|secs| Duration::try_seconds(secs).ok_or("whitelist duration out of range"))
        .transpose()?;

    let store = open_database(config)?;
    let entry = store.add(&user, node.as_ref(), duration, global, Utc::now())?;

    let scope = match &entry.node {
        Some(node) => format!("on {}", node),
        None => "globally".to_string(),
    };
    println!(
        "✅ Whitelisted {} {} until {}",
        entry.user,
        scope,
        entry.end_time.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

/// Ends `user`'s active entries on `node` (this host by default), or all of
/// them with `global`.
pub fn command_remove(
    config: &Config,
    user: &str,
    node: Option<&str>,
    global: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let user = parse_user(user)?;
    let node = resolve_node(config, node, global)?;

    let store = open_database(config)?;
    let ended = store.remove(&user, node.as_ref(), global, Utc::now())?;

    if ended == 0 {
        println!("ℹ️  No active whitelist entries found for {}", user);
    } else {
        println!("✅ Removed {} whitelist entries for {}", ended, user);
    }
    Ok(())
}
