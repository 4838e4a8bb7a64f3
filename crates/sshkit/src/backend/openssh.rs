//! Backend that shells out to the OpenSSH client.

use crate::backend::Backend;
use crate::error::{Error, Result, SSH_FAILURE_STATUS};
use crate::types::{Output, Target};
use log::trace;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

/// Backend that executes commands with the `ssh` binary.
///
/// Runs non-interactively (`BatchMode`), so hosts must accept key-based
/// authentication.
pub struct OpenSshBackend {
    program: PathBuf,
    connect_timeout: Duration,
    options: Vec<String>,
}

impl Default for OpenSshBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenSshBackend {
    /// Use `ssh` from `PATH` with a 10 second connect timeout.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            connect_timeout: Duration::from_secs(10),
            options: Vec::new(),
        }
    }

    /// Use a different client executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add an extra `-o` option, e.g. `StrictHostKeyChecking=accept-new`.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Build the client argument list for one invocation.
    pub fn args(&self, target: &Target, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = target.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        if let Some(user) = &target.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push("--".to_string());
        args.push(target.host.clone());
        args.push(command.to_string());
        args
    }
}

impl Backend for OpenSshBackend {
    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn execute(&self, target: &Target, command: &str, stdin: Option<&[u8]>) -> Result<Output> {
        trace!("ssh {target}: {command}");

        let mut cmd = Command::new(&self.program);
        // terminal interrupts must not reach commands in flight
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let mut child = cmd
            .args(self.args(target, command))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::SshNotFound(self.program.display().to_string()),
                _ => Error::Io(e),
            })?;

        let fed = match (stdin, child.stdin.take()) {
            (Some(content), Some(pipe)) => feed(pipe, content),
            _ => Ok(()),
        };
        // reaped even when feeding failed
        let waited = child.wait_with_output();
        fed?;
        let output = Output::from(waited?);
        if output.status == SSH_FAILURE_STATUS {
            return Err(Error::from_ssh_output(
                &target.host,
                output.status,
                &output.stderr_str(),
            ));
        }
        Ok(output)
    }
}

/// Write `content` to the child's stdin and close it.
///
/// A client that failed to connect closes its end early; that surfaces
/// through the exit status, not here.
fn feed(mut pipe: impl Write, content: &[u8]) -> Result<()> {
    match pipe.write_all(content) {
        Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(Error::Io(e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_minimal() {
        let backend = OpenSshBackend::new();
        let args = backend.args(&Target::new("a.example"), "wg show");

        assert_eq!(&args[..2], ["-o", "BatchMode=yes"]);
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(!args.contains(&"-p".to_string()));
        assert!(!args.contains(&"-l".to_string()));
        assert_eq!(&args[args.len() - 3..], ["--", "a.example", "wg show"]);
    }

    #[test]
    fn test_args_full_target() {
        let backend = OpenSshBackend::new()
            .with_connect_timeout(Duration::from_secs(3))
            .with_option("StrictHostKeyChecking=accept-new");
        let target = Target::new("2001:db8::1")
            .with_user("ops")
            .with_port(2222)
            .with_identity_file("/home/ops/.ssh/mesh");
        let args = backend.args(&target, "true");
        let joined = args.join(" ");

        assert!(joined.contains("ConnectTimeout=3"));
        assert!(joined.contains("-o StrictHostKeyChecking=accept-new"));
        assert!(joined.contains("-p 2222"));
        assert!(joined.contains("-i /home/ops/.ssh/mesh"));
        assert!(joined.contains("-l ops"));
        assert!(joined.ends_with("-- 2001:db8::1 true"));
    }

    #[test]
    fn test_missing_client() {
        let backend = OpenSshBackend::new().with_program("/nonexistent/ssh-client");
        assert!(!backend.is_available());
        let err = backend
            .execute(&Target::new("a"), "true", None)
            .unwrap_err();
        assert!(matches!(err, Error::SshNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_passes_arguments() {
        // `echo` stands in for the client and prints what it was given.
        let backend = OpenSshBackend::new().with_program("echo");
        let output = backend
            .execute(&Target::new("a.example").with_user("root"), "ip link", None)
            .unwrap();

        assert!(output.success());
        assert!(output.stdout_str().trim_end().ends_with("-l root -- a.example ip link"));
    }

    struct Failing(ErrorKind);

    impl Write for Failing {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(self.0.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_feed_tolerates_closed_stdin() {
        assert!(feed(Failing(ErrorKind::BrokenPipe), b"secret").is_ok());
        let err = feed(Failing(ErrorKind::PermissionDenied), b"secret").unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let mut sink = Vec::new();
        feed(&mut sink, b"secret").unwrap();
        assert_eq!(sink, b"secret");
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_with_stdin_client_exiting_early() {
        // `true` never reads its stdin, so the write hits a closed pipe.
        let backend = OpenSshBackend::new().with_program("true");
        let content = vec![b'x'; 1 << 20];
        let output = backend
            .execute(&Target::new("a.example"), "cat > /dev/null", Some(content.as_slice()))
            .unwrap();
        assert!(output.success());
    }
}
