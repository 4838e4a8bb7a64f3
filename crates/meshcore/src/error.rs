//! Error types for mesh compilation and reconciliation.
//!
//! Errors fall into two groups. [`ValidationError`] is raised while building
//! the topology, before anything touches a host, and aborts the whole run.
//! Everything else is scoped to a single host and ends up in that host's
//! [`Outcome`](crate::types::Outcome) instead of unwinding the run.

use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

/// A problem with the declared mesh, found before any remote action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The mesh declares no nodes
    #[error("mesh '{mesh}' has no nodes")]
    EmptyMesh {
        /// Mesh name
        mesh: String,
    },

    /// A mesh or node name contains characters unsafe for link and file names
    #[error("invalid {what} name '{name}': use letters, digits, '-', '_' or '.'")]
    InvalidName {
        /// What was being named ("mesh" or "node")
        what: &'static str,
        /// The offending name
        name: String,
    },

    /// Two nodes share a name
    #[error("duplicate node name '{name}'")]
    DuplicateName {
        /// The repeated name
        name: String,
    },

    /// A prefix or address could not be parsed
    #[error("invalid address '{value}' for {context}: {reason}")]
    InvalidAddress {
        /// Where the address came from
        context: String,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// A node address lies outside the mesh network
    #[error("node '{node}' address {address} is outside network {network}")]
    OutsideNetwork {
        /// Node name
        node: String,
        /// Declared address
        address: IpNet,
        /// Mesh network
        network: IpNet,
    },

    /// Two nodes declare the same address
    #[error("nodes '{first}' and '{second}' both use address {address}")]
    DuplicateAddress {
        /// The shared address
        address: IpAddr,
        /// Node declared first
        first: String,
        /// Node declared second
        second: String,
    },

    /// A peer list names a node that does not exist
    #[error("node '{node}' lists unknown peer '{peer}'")]
    UnknownPeer {
        /// Declaring node
        node: String,
        /// Missing peer
        peer: String,
    },

    /// A node lists itself as a peer
    #[error("node '{node}' lists itself as a peer")]
    SelfPeer {
        /// Declaring node
        node: String,
    },

    /// Spanning-tree priority outside -8..=7
    #[error("node '{node}' priority {prio} is outside -8..=7")]
    InvalidPriority {
        /// Node name
        node: String,
        /// Declared value
        prio: i32,
    },

    /// Endpoint is not `host[:port]`
    #[error("node '{node}' endpoint '{value}' is invalid: {reason}")]
    InvalidEndpoint {
        /// Node name
        node: String,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// The transit network cannot hold one address per node
    #[error("transit network {transit} is too small for {nodes} nodes")]
    TransitExhausted {
        /// Transit prefix
        transit: IpNet,
        /// Number of nodes
        nodes: usize,
    },

    /// The transit network overlaps the bridge network
    #[error("transit network {transit} overlaps mesh network {network}")]
    TransitOverlap {
        /// Transit prefix
        transit: IpNet,
        /// Mesh network
        network: IpNet,
    },

    /// Two derived link names collide on the same host
    #[error("derived link name '{name}' is used twice on node '{node}'")]
    LinkNameCollision {
        /// Colliding name
        name: String,
        /// Node name
        node: String,
    },
}

/// Failure reported by a [`RemoteExecutor`](crate::context::RemoteExecutor).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The host could not be contacted
    #[error("unreachable: {message}")]
    Unreachable {
        /// Transport diagnostic
        message: String,
    },

    /// A command ran but exited non-zero
    #[error("exit status {status}: {stderr}")]
    CommandFailed {
        /// Exit status
        status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Local I/O while talking to the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether the error means the host is out of reach rather than misbehaving.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Errors of the reconciliation engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The declared mesh is invalid
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A host could not be contacted
    #[error("node '{node}' is unreachable: {message}")]
    Unreachable {
        /// Node name
        node: String,
        /// Transport diagnostic
        message: String,
    },

    /// A remote operation returned a non-zero status
    #[error("node '{node}' failed at '{step}': {stderr}")]
    CommandFailed {
        /// Node name
        node: String,
        /// Failing step
        step: String,
        /// Captured diagnostics
        stderr: String,
    },

    /// A host carries a deployment this mesh does not own
    #[error("node '{node}' has a conflicting deployment: {reason}")]
    ConflictDetected {
        /// Node name
        node: String,
        /// What was found
        reason: String,
    },

    /// Probe output could not be understood
    #[error("node '{node}' returned unexpected probe output: {message}")]
    Probe {
        /// Node name
        node: String,
        /// Parser message
        message: String,
    },

    /// The run was cancelled
    #[error("cancelled")]
    Cancelled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
