//! Check command implementation.
//!
//! Validates system requirements and configuration.

use std::path::Path;

use node_nanny::config::{validate_effective_config, Config};
use node_nanny::process::{collect_proc_entries, ProcSampler, ProcessSampler};
use node_nanny::startup_checks::{check_proc_access, check_user_privileges};
use node_nanny::store::{Database, WhitelistStore};

/// Validates system requirements and configuration.
pub fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 node-nanny - System Check");
    println!("============================");

    let mut all_ok = true;
    let proc_root = Path::new("/proc");

    // Check /proc filesystem
    println!("\n📁 Checking /proc filesystem...");
    match check_proc_access(proc_root) {
        Ok(()) => {
            let proc_entries = collect_proc_entries(proc_root, Some(5));
            if proc_entries.is_empty() {
                println!("   ❌ Cannot read any process entries from /proc");
                all_ok = false;
            } else {
                println!("   ✅ Can read {} process entries", proc_entries.len());
            }
        }
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    // Check sampling end to end
    println!("\n💾 Checking memory sampling...");
    match ProcSampler::new(proc_root, config.max_processes).snapshot() {
        Ok(records) => {
            let total: f64 = records.iter().map(|r| r.memory_share).sum();
            println!(
                "   ✅ Sampled {} processes using {:.2}% of memory",
                records.len(),
                total
            );
        }
        Err(e) => {
            println!("   ❌ Sampling failed: {}", e);
            all_ok = false;
        }
    }

    // Check privileges
    println!("\n🔑 Checking privileges...");
    if check_user_privileges() {
        println!("   ✅ Running as root");
    } else {
        println!("   ⚠️  Not running as root - other users' processes cannot be killed");
    }

    // Check configuration
    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => {
            println!("   ✅ Configuration is valid");
        }
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    // Check database
    println!("\n🗄️  Checking database...");
    let db_path = config.database_path();
    match Database::open(&db_path) {
        Ok(db) => match config.node() {
            Ok(node) => match db.active_exemptions(&node, chrono::Utc::now()) {
                Ok(users) => println!(
                    "   ✅ {} readable ({} users whitelisted on {})",
                    db_path.display(),
                    users.len(),
                    node
                ),
                Err(e) => {
                    println!("   ❌ Cannot query {}: {}", db_path.display(), e);
                    all_ok = false;
                }
            },
            Err(e) => {
                println!("   ❌ Cannot determine node name: {}", e);
                all_ok = false;
            }
        },
        Err(e) => {
            println!("   ❌ Cannot open {}: {}", db_path.display(), e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
