//! Error types for remote operations.
//!
//! Errors are categorized so callers can tell a host that cannot be reached
//! apart from a command that ran and failed, and retry only the former.

use thiserror::Error;

/// Exit status the OpenSSH client uses for its own failures.
pub const SSH_FAILURE_STATUS: i32 = 255;

/// Categories of remote errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The host could not be contacted (transient, retryable)
    Connection,
    /// Authentication or privilege escalation was refused
    Permission,
    /// The local `ssh` client is missing
    NotFound,
    /// The remote command ran and exited non-zero
    Command,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Whether the host itself is out of reach, as opposed to misbehaving.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connection | Self::Permission | Self::NotFound)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Connection => "Host unreachable",
            Self::Permission => "Access denied",
            Self::NotFound => "SSH client not found",
            Self::Command => "Remote command failed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Connection => "Check that the host is up and accepts SSH connections",
            Self::Permission => {
                "Check the SSH key for this host and that the remote user has passwordless sudo"
            }
            Self::NotFound => "Install the OpenSSH client and make sure `ssh` is in PATH",
            Self::Command => "Inspect the command output above and the state of the host",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur while talking to a remote host.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure (refused, timed out, DNS, reset)
    #[error("cannot connect to {host}: {message}")]
    Connection {
        /// Host that was contacted
        host: String,
        /// Diagnostic printed by the client
        message: String,
    },

    /// Authentication failure or sudo refusing to run without a password
    #[error("permission denied on {host}: {message}")]
    Permission {
        /// Host that refused
        host: String,
        /// Diagnostic printed by the client or sudo
        message: String,
    },

    /// The `ssh` executable could not be started
    #[error("ssh client not found: {0}")]
    SshNotFound(String),

    /// Remote command exited non-zero
    #[error("command exited with status {status}: {stderr}")]
    CommandFailed {
        /// Exit status of the remote command
        status: i32,
        /// Standard error output of the remote command
        stderr: String,
    },

    /// A connection target could not be parsed
    #[error("invalid target '{value}': {reason}")]
    InvalidTarget {
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Connection { .. } => ErrorCategory::Connection,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::SshNotFound(_) => ErrorCategory::NotFound,
            Error::CommandFailed { .. } => ErrorCategory::Command,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Create an error from a failed `ssh` invocation.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_ssh_output(host: &str, status: i32, stderr: &str) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if stderr_lower.contains("permission denied")
            || stderr_lower.contains("host key verification failed")
            || stderr_lower.contains("too many authentication failures")
            || stderr_lower.contains("a password is required")
            || stderr_lower.contains("a terminal is required")
            || stderr_lower.contains("is not in the sudoers file")
        {
            return Error::Permission {
                host: host.to_string(),
                message,
            };
        }

        // 255 is also a legal exit status of the remote command; only a
        // silent exit or an ssh diagnostic means the transport failed.
        let transport = stderr_lower.starts_with("ssh:")
            || stderr_lower.contains("could not resolve hostname")
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("connection timed out")
            || stderr_lower.contains("no route to host")
            || stderr_lower.contains("network is unreachable")
            || stderr_lower.contains("connection reset")
            || stderr_lower.contains("connection closed")
            || stderr_lower.contains("kex_exchange_identification")
            || stderr_lower.contains("broken pipe");
        if transport || (status == SSH_FAILURE_STATUS && message.is_empty()) {
            return Error::Connection {
                host: host.to_string(),
                message: if message.is_empty() {
                    format!("ssh exited with status {status}")
                } else {
                    message
                },
            };
        }

        Error::CommandFailed {
            status,
            stderr: message,
        }
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;
