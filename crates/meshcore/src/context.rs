//! Collaborator traits and run-scoped context
//!
//! These traits let the engine run without depending on a particular
//! transport, key source, or terminal UI.

use crate::error::RemoteError;
use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::topology::Node;
use crate::types::{CommandOutput, Outcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Runs commands and moves files on mesh hosts
///
/// Implementations run everything with root privileges and enforce their
/// own connection and command timeouts, reporting them as ordinary errors.
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on `node`
    ///
    /// A non-zero exit status is returned as output, not as an error.
    fn run(&self, node: &Node, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Write `content` to `path` on `node` with the given permission bits
    ///
    /// The content must not appear on any command line.
    fn write_file(
        &self,
        node: &Node,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<(), RemoteError>;

    /// Read a file from `node`; `None` when it does not exist
    fn read_file(&self, node: &Node, path: &str) -> Result<Option<String>, RemoteError>;

    /// Run a command and return its stdout, failing on non-zero exit
    fn run_checked(&self, node: &Node, command: &str) -> Result<String, RemoteError> {
        let output = self.run(node, command)?;
        if !output.success() {
            return Err(RemoteError::CommandFailed {
                status: output.status,
                stderr: output.stderr_str().trim().to_string(),
            });
        }
        Ok(output.stdout_str())
    }

    /// Run a state-changing command and return its stdout
    ///
    /// Unlike reads, the command is attempted once. A transport failure
    /// may hide a command that already ran, so the error goes back to the
    /// plan instead of being repeated here.
    fn apply(&self, node: &Node, command: &str) -> Result<String, RemoteError> {
        self.run_checked(node, command)
    }
}

/// Source of fresh key material
pub trait KeyGenerator: Send + Sync {
    fn generate_keypair(&self) -> (PrivateKey, PublicKey);

    fn generate_preshared(&self) -> PresharedKey;
}

/// Progress callback for probing and applying
///
/// Called from worker threads, one node per thread at a time.
pub trait ProgressCallback: Send + Sync {
    /// Called when a node's plan starts
    fn on_node_start(&self, node: &str, ops: usize);

    /// Called before each operation
    fn on_op_start(&self, node: &str, description: &str);

    /// Called when a node finishes, whatever the outcome
    fn on_node_complete(&self, node: &str, outcome: &Outcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_node_start(&self, _node: &str, _ops: usize) {}
    fn on_op_start(&self, _node: &str, _description: &str) {}
    fn on_node_complete(&self, _node: &str, _outcome: &Outcome) {}
}

/// Shared cancellation flag
///
/// Checked between operations: an operation already running on a host is
/// allowed to finish, the rest of that host's plan is skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
