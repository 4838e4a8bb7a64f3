//! Backend abstraction for reaching remote hosts.
//!
//! The [`Backend`] trait is the single seam between [`Session`](crate::Session)
//! and a transport, allowing the OpenSSH client to be replaced by a mock.

pub mod openssh;

use crate::error::Result;
use crate::types::{Output, Target};

/// Transport that runs one shell command on a host.
pub trait Backend: Send + Sync {
    /// Check if the transport can be used at all.
    fn is_available(&self) -> bool;

    /// Run `command` through the remote login shell.
    ///
    /// `stdin`, when given, is fed to the command and never appears in its
    /// arguments. A non-zero remote exit status is returned as [`Output`];
    /// transport failures are errors.
    fn execute(&self, target: &Target, command: &str, stdin: Option<&[u8]>) -> Result<Output>;
}

/// Get the default backend.
pub fn default_backend() -> Box<dyn Backend> {
    Box::new(openssh::OpenSshBackend::new())
}
