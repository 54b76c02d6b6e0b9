//! Email notifications for users whose processes were terminated.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::NotifyError;
use crate::store::{Hostname, UserName};

/// Addressing used for outbound notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailSettings {
    /// Mail domain appended to usernames.
    pub domain: String,
    pub from: String,
}

impl EmailSettings {
    pub fn address_for(&self, user: &UserName) -> String {
        format!("{}@{}", user, self.domain)
    }
}

/// A composed notification ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Builds the termination notice sent to `user`.
    ///
    /// `user_usage`, `total` and `limit` are percentages of system memory.
    pub fn termination(
        settings: &EmailSettings,
        user: &UserName,
        node: &Hostname,
        user_usage: f64,
        total: f64,
        limit: f64,
    ) -> Self {
        let subject = format!("Processes terminated on {}", node);
        let body = format!(
            "Hello {user},\n\n\
             Your processes on {node} have been terminated because the node ran out of memory.\n\n\
             Your processes were using {user_usage:.2}% of system memory.\n\
             Total memory usage on {node} was {total:.2}%, above the limit of {limit:.2}%.\n\n\
             Please reduce the memory footprint of your jobs or run them on a dedicated node.\n"
        );

        Self {
            to: settings.address_for(user),
            from: settings.from.clone(),
            subject,
            body,
        }
    }

    /// RFC 822 text with headers, as read by `sendmail -t`.
    pub fn to_rfc822(&self) -> String {
        format!(
            "To: {}\nFrom: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            self.to, self.from, self.subject, self.body
        )
    }
}

/// Outbound mail transport.
pub trait Mailer: Send + Sync {
    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

/// Delivers mail by piping it into a local `sendmail -t`.
pub struct SendmailMailer {
    program: PathBuf,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Mailer for SendmailMailer {
    fn send(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let program = self.program.display().to_string();
        let spawn_error = |source| NotifyError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.to_rfc822().as_bytes())
                .map_err(spawn_error)?;
        }

        let output = child.wait_with_output().map_err(spawn_error)?;
        if !output.status.success() {
            return Err(NotifyError::Exit {
                program,
                status: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        debug!("Sent notification to {}", message.to);
        Ok(())
    }
}
