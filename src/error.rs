//! Error types shared by the scan loop, the enforcer and the whitelist store.

use thiserror::Error;

/// Rejected field values for users, nodes and notification records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("username must not be empty")]
    EmptyUsername,

    #[error("username '{0}' contains whitespace")]
    UsernameWhitespace(String),

    #[error("hostname must not be empty")]
    EmptyHostname,

    #[error("hostname '{hostname}' contains invalid character {character:?}")]
    HostnameCharacter { hostname: String, character: char },

    #[error("percentage {0} is outside 0-100")]
    Percentage(f64),

    #[error("memory {0} must not be negative")]
    NegativeMemory(i64),

    #[error("limit {0} must not be negative")]
    NegativeLimit(f64),

    #[error("whitelist duration must be positive")]
    Duration,
}

/// Errors raised while reading the process table.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no running processes found for user {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {path} format: {reason}")]
    Format { path: String, reason: String },
}

/// Errors raised while delivering a termination signal to a single PID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("process {0} no longer exists")]
    NoSuchProcess(u32),

    #[error("not permitted to signal process {0}")]
    PermissionDenied(u32),

    #[error("failed to signal process {pid}: {reason}")]
    Other { pid: u32, reason: String },
}

/// Errors raised by the outbound notification transport.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum NannyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("failed to signal {} of the processes owned by {user}", failures.len())]
    PartialEnforcementFailure {
        user: String,
        failures: Vec<SignalError>,
    },

    #[error("memory usage {total:.2}% still above limit {limit:.2}% after exhausting candidates")]
    LimitNotRestored { total: f64, limit: f64 },
}

pub type Result<T, E = NannyError> = std::result::Result<T, E>;
