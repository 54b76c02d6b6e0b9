//! Configuration management for node-nanny.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, Commands, ConfigFormat};
use crate::enforcer::parse_signal;
use crate::notifier::EmailSettings;
use crate::policy::Thresholds;
use crate::store::Hostname;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_FREQUENCY_SECONDS: u64 = 1;
pub const DEFAULT_MEMORY_LIMIT: f64 = 20.0;
pub const DEFAULT_MIN_USAGE: f64 = 5.0;
pub const DEFAULT_WAIT_SECONDS: u64 = 5;
pub const DEFAULT_DATABASE_PATH: &str = "/var/lib/node-nanny/node-nanny.db";
pub const DEFAULT_KILL_SIGNAL: &str = "SIGTERM";
pub const DEFAULT_SENDMAIL_PATH: &str = "/usr/sbin/sendmail";
pub const DEFAULT_KILL_SETTLE_MS: u64 = 2000;

/// Configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Scan loop
    #[serde(alias = "frequency")]
    pub frequency_seconds: Option<u64>,
    /// Memory limit in percent of system memory
    #[serde(alias = "max-mem")]
    pub memory_limit: Option<f64>,
    /// Users at or below this usage in percent are never targeted
    #[serde(alias = "min-mem")]
    pub min_usage: Option<f64>,
    /// Grace period before enforcement
    #[serde(alias = "wait")]
    pub wait_seconds: Option<u64>,

    // Node identity and storage
    pub hostname: Option<String>,
    pub database_path: Option<PathBuf>,

    // Enforcement
    pub kill_signal: Option<String>,
    /// How long to wait for signalled processes to exit before re-sampling
    pub kill_settle_ms: Option<u64>,

    // Notifications
    pub enable_email: Option<bool>,
    pub email_domain: Option<String>,
    pub email_from: Option<String>,
    pub sendmail_path: Option<PathBuf>,

    // Sampling
    pub parallelism: Option<usize>,
    pub max_processes: Option<usize>,

    // Logging
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frequency_seconds: Some(DEFAULT_FREQUENCY_SECONDS),
            memory_limit: Some(DEFAULT_MEMORY_LIMIT),
            min_usage: Some(DEFAULT_MIN_USAGE),
            wait_seconds: Some(DEFAULT_WAIT_SECONDS),
            hostname: None,
            database_path: Some(PathBuf::from(DEFAULT_DATABASE_PATH)),
            kill_signal: Some(DEFAULT_KILL_SIGNAL.into()),
            kill_settle_ms: Some(DEFAULT_KILL_SETTLE_MS),
            enable_email: Some(true),
            email_domain: None,
            email_from: None,
            sendmail_path: Some(PathBuf::from(DEFAULT_SENDMAIL_PATH)),
            parallelism: None,
            max_processes: None,
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            memory_limit: self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT),
            min_usage: self.min_usage.unwrap_or(DEFAULT_MIN_USAGE),
            wait: Duration::from_secs(self.wait_seconds.unwrap_or(DEFAULT_WAIT_SECONDS)),
        }
    }

    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_seconds.unwrap_or(DEFAULT_FREQUENCY_SECONDS))
    }

    pub fn kill_settle(&self) -> Duration {
        Duration::from_millis(self.kill_settle_ms.unwrap_or(DEFAULT_KILL_SETTLE_MS))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH))
    }

    pub fn kill_signal(&self) -> &str {
        self.kill_signal.as_deref().unwrap_or(DEFAULT_KILL_SIGNAL)
    }

    /// Configured hostname, or the system hostname when unset.
    pub fn node(&self) -> Result<Hostname, Box<dyn std::error::Error>> {
        match self.hostname.as_deref() {
            Some(name) => Ok(Hostname::parse(name)?),
            None => Ok(Hostname::current()?),
        }
    }

    /// Email addressing, or `None` when email is disabled.
    ///
    /// Without a configured domain the node's hostname is used.
    pub fn email_settings(&self, node: &Hostname) -> Option<EmailSettings> {
        if !self.enable_email.unwrap_or(true) {
            return None;
        }
        let domain = self
            .email_domain
            .clone()
            .unwrap_or_else(|| node.to_string());
        let from = self
            .email_from
            .clone()
            .unwrap_or_else(|| format!("node-nanny@{}", domain));
        Some(EmailSettings { domain, from })
    }

    pub fn sendmail_path(&self) -> PathBuf {
        self.sendmail_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SENDMAIL_PATH))
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if cfg.frequency_seconds == Some(0) {
        return Err("frequency_seconds must be greater than 0".into());
    }

    for (name, value) in [("memory_limit", cfg.memory_limit), ("min_usage", cfg.min_usage)] {
        if let Some(v) = value {
            if !(0.0..=100.0).contains(&v) {
                return Err(format!("{} must be between 0 and 100, got {}", name, v).into());
            }
        }
    }

    if let Some(hostname) = cfg.hostname.as_deref() {
        Hostname::parse(hostname)
            .map_err(|e| format!("Invalid hostname '{}': {}", hostname, e))?;
    }

    parse_signal(cfg.kill_signal())?;

    if let Some(domain) = cfg.email_domain.as_deref() {
        if domain.is_empty() || domain.contains(char::is_whitespace) || domain.contains('@') {
            return Err(format!("Invalid email_domain '{}'", domain).into());
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        match level {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(format!(
                    "Invalid log_level '{}', expected off|error|warn|info|debug|trace",
                    other
                )
                .into());
            }
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    // Global overrides
    if let Some(database) = &args.database {
        config.database_path = Some(database.clone());
    }
    if let Some(hostname) = &args.hostname {
        config.hostname = Some(hostname.clone());
    }
    if let Some(signal) = &args.kill_signal {
        config.kill_signal = Some(signal.clone());
    }
    if args.no_email {
        config.enable_email = Some(false);
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = Some(parallelism);
    }
    if let Some(max_processes) = args.max_processes {
        config.max_processes = Some(max_processes);
    }

    // Scan thresholds: CLI wins if provided
    if let Some(Commands::Scan {
        max_mem,
        min_mem,
        wait,
        frequency,
    }) = &args.command
    {
        if max_mem.is_some() {
            config.memory_limit = *max_mem;
        }
        if min_mem.is_some() {
            config.min_usage = *min_mem;
        }
        if wait.is_some() {
            config.wait_seconds = *wait;
        }
        if frequency.is_some() {
            config.frequency_seconds = *frequency;
        }
    }

    Ok(config)
}

/// Configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/node-nanny/node-nanny.yaml",
            "/etc/node-nanny/node-nanny.yml",
            "/etc/node-nanny/node-nanny.json",
            "/etc/node-nanny/node-nanny.toml",
            "./node-nanny.yaml",
            "./node-nanny.yml",
            "./node-nanny.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Shows configuration in requested format
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };

    println!("{output}");
    Ok(())
}
