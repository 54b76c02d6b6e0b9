//! Validated records held by the whitelist store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{NannyError, ValidationError};

/// Characters that may not appear in a hostname.
const RESERVED_HOSTNAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Account name of a user; non-empty and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserName(String);

impl UserName {
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(ValidationError::UsernameWhitespace(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hostname of a node; non-empty, no whitespace or path/reserved characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
    pub fn parse(hostname: &str) -> Result<Self, ValidationError> {
        if hostname.is_empty() {
            return Err(ValidationError::EmptyHostname);
        }
        if let Some(character) = hostname
            .chars()
            .find(|c| c.is_whitespace() || RESERVED_HOSTNAME_CHARS.contains(c))
        {
            return Err(ValidationError::HostnameCharacter {
                hostname: hostname.to_string(),
                character,
            });
        }
        Ok(Self(hostname.to_string()))
    }

    /// Hostname of the machine we are running on.
    pub fn current() -> Result<Self, NannyError> {
        let name = nix::unistd::gethostname()
            .map_err(|e| NannyError::InvalidArgument(format!("cannot read hostname: {e}")))?;
        Ok(Self::parse(&name.to_string_lossy())?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Hostname {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Where a whitelist entry applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhitelistScope {
    Node(Hostname),
    Global,
}

impl WhitelistScope {
    /// Exactly one of `node` or `global` must be given.
    pub fn from_args(node: Option<&Hostname>, global: bool) -> Result<Self, NannyError> {
        match (node, global) {
            (Some(node), false) => Ok(Self::Node(node.clone())),
            (None, true) => Ok(Self::Global),
            (None, false) => Err(NannyError::InvalidArgument(
                "must either specify a node name or set global".to_string(),
            )),
            (Some(_), true) => Err(NannyError::InvalidArgument(
                "a node name cannot be combined with global".to_string(),
            )),
        }
    }
}

/// Exemption of a user from termination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhitelistEntry {
    pub id: i64,
    pub user: UserName,
    /// `None` only for global entries.
    pub node: Option<Hostname>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub global: bool,
}

impl WhitelistEntry {
    /// Active iff `now` lies in `[start_time, end_time)`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn covers(&self, node: &Hostname) -> bool {
        self.global || self.node.as_ref() == Some(node)
    }
}

/// Record of a user being notified about terminated processes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub user: UserName,
    pub node: Hostname,
    pub time: DateTime<Utc>,
    /// Resident bytes held by the user when their processes were killed.
    pub memory: i64,
    /// System-wide usage in percent at kill time.
    pub percentage: f64,
    /// Memory limit in percent that triggered the kill.
    pub limit: f64,
}

impl NotificationRecord {
    pub fn new(
        user: UserName,
        node: Hostname,
        time: DateTime<Utc>,
        memory: i64,
        percentage: f64,
        limit: f64,
    ) -> Result<Self, ValidationError> {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(ValidationError::Percentage(percentage));
        }
        if memory < 0 {
            return Err(ValidationError::NegativeMemory(memory));
        }
        if limit < 0.0 || limit.is_nan() {
            return Err(ValidationError::NegativeLimit(limit));
        }
        Ok(Self {
            user,
            node,
            time,
            memory,
            percentage,
            limit,
        })
    }
}
