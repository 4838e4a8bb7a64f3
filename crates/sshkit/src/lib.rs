//! # sshkit
//!
//! Run commands and move files on remote hosts with root privileges,
//! through the system OpenSSH client.
//!
//! This crate provides:
//! - A [`Session`] that runs shell commands as root (escalating with `sudo -n`)
//! - File reads and atomic, permission-restricted file writes over stdin
//! - Categorized errors that separate unreachable hosts from failed commands
//! - Retry with exponential backoff for connection failures
//!
//! ## Example
//!
//! ```no_run
//! use sshkit::{Session, Target};
//!
//! let session = Session::new();
//! let target = Target::parse("ops@a.example:2222")?;
//!
//! let output = session.run(&target, "ip -br link")?;
//! println!("{}", output.stdout_str());
//!
//! session.write_file(&target, "/etc/wireguard/wg0.key", b"secret\n", 0o600)?;
//! # Ok::<(), sshkit::Error>(())
//! ```
//!
//! Content written with [`Session::write_file`] travels on the command's
//! standard input and never appears on a command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod retry;
pub mod shell;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use types::{Output, RetryConfig, Target};

use backend::Backend;
use log::debug;
use std::path::Path;

/// Exit status the read wrapper uses for a missing file.
const MISSING_STATUS: i32 = 44;

/// Privileged command runner for remote hosts.
pub struct Session {
    backend: Box<dyn Backend>,
    retry: RetryConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with the OpenSSH backend and default retries.
    pub fn new() -> Self {
        Self::with_backend(backend::default_backend())
    }

    /// Create a session with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check if the transport is usable.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    fn execute(&self, target: &Target, command: &str, stdin: Option<&[u8]>) -> Result<Output> {
        let wrapped = shell::privileged(target, command);
        retry::with_retry(&self.retry, Some(&retry::LogCallback), || {
            self.backend.execute(target, &wrapped, stdin)
        })
    }

    /// Run `command` as root; a non-zero exit status is not an error.
    ///
    /// Connection failures are retried, so `command` must be safe to repeat.
    pub fn run(&self, target: &Target, command: &str) -> Result<Output> {
        self.execute(target, command, None)
    }

    /// Run `command` as root and return its stdout, failing on non-zero exit.
    ///
    /// Connection failures are retried, so `command` must be safe to repeat.
    pub fn run_checked(&self, target: &Target, command: &str) -> Result<String> {
        checked(target, self.run(target, command)?)
    }

    /// Run a state-changing `command` as root exactly once.
    ///
    /// A dropped connection may have happened after the command ran, so
    /// nothing is retried; the error is returned as is.
    pub fn run_once(&self, target: &Target, command: &str) -> Result<String> {
        let wrapped = shell::privileged(target, command);
        checked(target, self.backend.execute(target, &wrapped, None)?)
    }

    /// Atomically replace `path` with `content`, readable only as `mode` allows.
    ///
    /// Missing parent directories are created with mode 0700.
    pub fn write_file(&self, target: &Target, path: &str, content: &[u8], mode: u32) -> Result<()> {
        debug!("{target}: writing {path} ({} bytes, mode {mode:o})", content.len());
        let output = self.execute(target, &write_command(path, mode), Some(content))?;
        if !output.success() {
            return Err(Error::from_ssh_output(
                &target.host,
                output.status,
                &output.stderr_str(),
            ));
        }
        Ok(())
    }

    /// Read `path`; `None` when it does not exist.
    pub fn read_file(&self, target: &Target, path: &str) -> Result<Option<String>> {
        let output = self.run(target, &read_command(path))?;
        match output.status {
            0 => Ok(Some(output.stdout_str())),
            MISSING_STATUS => Ok(None),
            status => Err(Error::from_ssh_output(
                &target.host,
                status,
                &output.stderr_str(),
            )),
        }
    }
}

fn checked(target: &Target, output: Output) -> Result<String> {
    if !output.success() {
        return Err(Error::from_ssh_output(
            &target.host,
            output.status,
            &output.stderr_str(),
        ));
    }
    Ok(output.stdout_str())
}

fn write_command(path: &str, mode: u32) -> String {
    let dir = Path::new(path)
        .parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());
    let tmp = format!("{path}.tmp");
    format!(
        "umask 077 && mkdir -p {dir} && cat > {tmp} && chmod {mode:o} {tmp} && mv -f {tmp} {path}",
        dir = shell::quote(&dir),
        tmp = shell::quote(&tmp),
        path = shell::quote(path),
    )
}

fn read_command(path: &str) -> String {
    let path = shell::quote(path);
    format!("if [ -e {path} ]; then cat -- {path}; else exit {MISSING_STATUS}; fi")
}
