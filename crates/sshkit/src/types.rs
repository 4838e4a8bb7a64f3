//! Core types for remote execution.

use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or address
    pub host: String,
    /// Remote user; the client's default when `None`
    pub user: Option<String>,
    /// SSH port; the client's default when `None`
    pub port: Option<u16>,
    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,
}

impl Target {
    /// Create a target for `host` with client defaults.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
        }
    }

    /// Set the remote user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file.
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Parse `[user@]host[:port]`.
    ///
    /// IPv6 literals with a port are written `[addr]:port`; a bare IPv6
    /// literal without brackets is taken as a host with no port.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidTarget {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (user, rest) = match value.split_once('@') {
            Some((user, rest)) => {
                if user.is_empty() {
                    return Err(invalid("empty user"));
                }
                (Some(user.to_string()), rest)
            }
            None => (None, value),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("missing ']'"))?;
            match tail {
                "" => (host, None),
                _ => {
                    let port = tail
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?;
                    (host, Some(port))
                }
            }
        } else {
            match rest.matches(':').count() {
                0 => (rest, None),
                1 => rest
                    .split_once(':')
                    .map(|(h, p)| (h, Some(p)))
                    .ok_or_else(|| invalid("malformed port"))?,
                _ => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| invalid("port must be 1-65535")))
            .transpose()?;
        if port == Some(0) {
            return Err(invalid("port must be 1-65535"));
        }

        Ok(Self {
            host: host.to_string(),
            user,
            port,
            identity_file: None,
        })
    }

    /// Whether commands already run as root without escalation.
    pub fn is_root(&self) -> bool {
        self.user.as_deref() == Some("root")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') && self.port.is_some() {
            write!(f, "[{}]", self.host)?;
        } else {
            write!(f, "{}", self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Exit status; -1 when killed by a signal
    pub status: i32,
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Raw standard error
    pub stderr: Vec<u8>,
}

impl Output {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Standard output, lossily decoded.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error, lossily decoded.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl From<std::process::Output> for Output {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Configuration for retry behavior on connection failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}
