//! Scan command implementation.
//!
//! Runs the memory guardian until SIGINT or SIGTERM.

use std::future::Future;
use tracing::{error, info};

use node_nanny::config::Config;
use node_nanny::scan_loop::ScanLoop;
use node_nanny::startup_checks;

use super::{build_enforcer, open_database, proc_sampler};

/// Monitors memory usage and enforces the limit until `shutdown` resolves.
pub async fn command_scan<F>(config: &Config, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let node = config.node()?;
    let sampler = proc_sampler(config);

    if let Err(e) = startup_checks::validate_requirements(sampler.proc_root()) {
        error!("❌ Startup validation failed: {}", e);
        return Err(e.into());
    }

    let store = open_database(config)?;
    let enforcer = build_enforcer(config, sampler.clone(), store.clone(), &node, true)?;

    let scan_loop = ScanLoop::new(
        sampler,
        store,
        enforcer,
        config.thresholds(),
        config.frequency(),
    );
    let stats = scan_loop.stats();

    info!("Starting node-nanny on {}", node);
    scan_loop.run(shutdown).await;

    info!("Scan loop stopped\n{}", stats.render_table());
    Ok(())
}
