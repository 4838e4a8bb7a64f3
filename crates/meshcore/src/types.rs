//! Core types shared by the planner, the executor and callers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Output;

/// What a run is trying to achieve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Bring every host to the desired state; `force` overrides conflicts
    Up { force: bool },
    /// Converge live hosts, refresh persisted files on the others
    Sync,
    /// Tear down live state; `remove` also deletes persisted files
    Down { remove: bool },
}

impl Mode {
    /// Command name, for messages
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Up { .. } => "up",
            Self::Sync => "sync",
            Self::Down { .. } => "down",
        }
    }
}

/// Final state of one node after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Every operation applied
    Succeeded { applied: usize },
    /// An operation failed; the remaining ones were not attempted
    Failed { step: String, cause: String },
    /// The node could not be probed; nothing was attempted
    SkippedUnreachable { reason: String },
    /// The node carries a deployment this mesh does not own
    Conflict { reason: String },
}

impl Outcome {
    /// Check if the node converged
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Short label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::SkippedUnreachable { .. } => "unreachable",
            Self::Conflict { .. } => "conflict",
        }
    }
}

/// Outcome of every node in one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub outcomes: BTreeMap<String, Outcome>,
}

impl RunReport {
    /// Record the outcome for a node
    pub fn record(&mut self, node: impl Into<String>, outcome: Outcome) {
        self.outcomes.insert(node.into(), outcome);
    }

    /// Overall success requires every node to succeed
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(Outcome::is_success)
    }

    /// Nodes that did not succeed, with their outcome
    pub fn failures(&self) -> impl Iterator<Item = (&String, &Outcome)> {
        self.outcomes.iter().filter(|(_, o)| !o.is_success())
    }

    /// Total operations applied across nodes
    pub fn total_applied(&self) -> usize {
        self.outcomes
            .values()
            .map(|o| match o {
                Outcome::Succeeded { applied } => *applied,
                _ => 0,
            })
            .sum()
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: RunReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Options for applying plans
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of hosts handled in parallel
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self { jobs: 4 }
    }
}

/// Output of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

impl CommandOutput {
    /// Successful, empty output
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
