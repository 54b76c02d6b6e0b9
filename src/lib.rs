//! node-nanny library
//!
//! A per-node memory guardian. Running processes are sampled from `/proc`,
//! their memory is summed per user and, once total usage has stayed above
//! the configured limit for longer than the grace period, the processes of
//! the heaviest non-whitelisted users are terminated until usage is back
//! within the limit.
//!
//! # Components
//!
//! - **Sampling** ([`process`]): snapshots of all processes with owner and memory share
//! - **Aggregation** ([`usage`]): per-user totals and the system-wide total
//! - **Policy** ([`policy`]): grace window, floor and kill order
//! - **Enforcement** ([`enforcer`]): signals processes and notifies users
//! - **Whitelist** ([`store`]): exemptions and notification history in SQLite
//! - **Scan loop** ([`scan_loop`]): ties the above together on a fixed cadence
//!
//! # Usage
//!
//! ```rust,no_run
//! use node_nanny::store::{Database, Hostname, UserName, WhitelistStore};
//!
//! let db = Database::open_in_memory().unwrap();
//! let alice = UserName::parse("alice").unwrap();
//! let node = Hostname::parse("node1").unwrap();
//!
//! db.add(&alice, Some(&node), None, false, chrono::Utc::now()).unwrap();
//! assert!(db.is_exempt(&alice, &node, chrono::Utc::now()).unwrap());
//! ```

pub mod cli;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod notifier;
pub mod policy;
pub mod process;
pub mod scan_loop;
pub mod startup_checks;
pub mod stats;
pub mod store;
pub mod usage;

// Re-export main types for convenience
pub use enforcer::{Enforcer, KillReport, NixSignaller, Signaller};
pub use error::{NannyError, Result};
pub use policy::{Decision, EnforcementPolicy, PolicyState, Thresholds};
pub use scan_loop::{ScanLoop, TickReport};
pub use store::{Database, WhitelistStore};
pub use usage::{aggregate, UsageSnapshot, UserUsage};
