//! History command implementation.
//!
//! Prints recorded notifications, newest first.

use node_nanny::config::Config;
use node_nanny::store::WhitelistStore;

use super::{open_database, parse_user};

/// Prints the notification history, optionally for a single user.
pub fn command_history(config: &Config, user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let user = user.map(parse_user).transpose()?;
    let store = open_database(config)?;
    let records = store.notification_history(user.as_ref())?;

    if records.is_empty() {
        println!("No notifications recorded");
        return Ok(());
    }

    println!(
        "{:<16} {:<24} {:<20} {:>12} {:>8} {:>8}",
        "USER", "NODE", "TIME", "MEMORY (MB)", "USAGE %", "LIMIT %"
    );
    println!("{}", "-".repeat(93));

    for record in &records {
        println!(
            "{:<16} {:<24} {:<20} {:>12.1} {:>8.2} {:>8.2}",
            record.user.as_str(),
            record.node.as_str(),
            record.time.format("%Y-%m-%d %H:%M:%S"),
            record.memory as f64 / 1024.0 / 1024.0,
            record.percentage,
            record.limit
        );
    }

    Ok(())
}
