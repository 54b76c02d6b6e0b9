//! node-nanny
//!
//! Per-node memory guardian with tracing logging.
//! This is the main entry point that resolves configuration and dispatches subcommands.

mod commands;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{debug, error, info, Level};

use commands::{
    command_add, command_check, command_config, command_history, command_kill, command_remove,
    command_scan, command_whitelist,
};
use node_nanny::cli::{Args, Commands, LogLevel};
use node_nanny::config::{resolve_config, show_config, validate_effective_config, Config};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config, args: &Args) {
    let level = args.log_level.clone().unwrap_or_else(|| {
        config
            .log_level
            .as_deref()
            .and_then(|l| LogLevel::from_str(l, true).ok())
            .unwrap_or(LogLevel::Info)
    });

    let log_level = match level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    };

    let Some(log_level) = log_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    debug!("Logging initialized with level: {:?}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    let Some(command) = &args.command else {
        eprintln!("❌ No command given, see --help");
        std::process::exit(2);
    };

    // Generating a config file must work even when the current one is broken
    if let Commands::Config {
        output,
        format,
        commented,
    } = command
    {
        return command_config(output.clone(), format.clone(), *commented);
    }

    let config = load_validated_config(&args)?;
    setup_logging(&config, &args);

    // Configure parallel processing
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
            debug!("Rayon thread pool configured with {} threads", threads);
        }
    }

    match command {
        Commands::Scan { .. } => command_scan(&config, shutdown_signal()).await,
        Commands::Kill { user, quiet } => command_kill(&config, user, *quiet),
        Commands::History { user } => command_history(&config, user.as_deref()),
        Commands::Whitelist => command_whitelist(&config),
        Commands::Add {
            user,
            duration,
            node,
            global,
        } => command_add(&config, user, *duration, node.as_deref(), *global),
        Commands::Remove { user, node, global } => {
            command_remove(&config, user, node.as_deref(), *global)
        }
        Commands::Check => command_check(&config),
        Commands::Config { .. } => unreachable!("Config handled above"),
    }
}
