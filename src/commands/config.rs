//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use node_nanny::cli::ConfigFormat;
use node_nanny::config::Config;

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from("node-nanny.yaml"),
    };

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# node-nanny Configuration
# ========================
#
# Scan Loop
# ---------
# frequency_seconds: 1         # Seconds between scans
# memory_limit: 20.0           # Memory limit in percent of system memory
# min_usage: 5.0               # Users at or below this percent are never killed
# wait_seconds: 5              # Grace period above the limit before killing
#
# Node Identity and Storage
# -------------------------
# hostname: null               # Node name (null = system hostname)
# database_path: "/var/lib/node-nanny/node-nanny.db"
#
# Enforcement
# -----------
# kill_signal: "SIGTERM"       # Signal sent to processes (SIGTERM, SIGKILL, ...)
# kill_settle_ms: 2000         # Wait for killed processes to exit before re-measuring
#
# Notifications
# -------------
# enable_email: true           # Email users whose processes were killed
# email_domain: null           # Mail domain (null = hostname)
# email_from: null             # Sender (null = node-nanny@<email_domain>)
# sendmail_path: "/usr/sbin/sendmail"
#
# Sampling
# --------
# parallelism: null            # Parallel threads (null = auto)
# max_processes: null          # Maximum processes to scan
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
