//! # meshcore
//!
//! Mesh topology compiler and per-host reconciliation engine for
//! WireGuard + GRE (`gretap`/`ip6gretap`) + bridge overlays.
//!
//! This crate turns a declared mesh into per-host plans and converges real
//! hosts to them, without knowing how those hosts are reached.
//!
//! ## Core Concepts
//!
//! - **Topology**: validated nodes and the symmetric edge set derived once
//! - **KeyManager**: identities and preshared keys for one run
//! - **Probe**: read-only snapshot of what a host has deployed
//! - **Diff**: pure, ordered operations from observed to desired state
//! - **Apply**: per-host sequential, cross-host parallel execution
//!
//! ## Example
//!
//! ```ignore
//! use meshcore::{
//!     CancelToken, ExecuteOptions, KeyManager, Mode, NoProgress, OsKeyGenerator,
//!     Topology, apply, compute_plan, probe_all,
//! };
//!
//! let topology = Topology::build(&decl)?;
//! let opts = ExecuteOptions::default();
//! let observed = probe_all(&remote, &topology, &opts, &NoProgress)?;
//!
//! let generator = OsKeyGenerator;
//! let mut keys = KeyManager::new(&generator);
//! let plan = compute_plan(&topology, &observed, Mode::Up { force: false }, &mut keys);
//!
//! let report = apply(&topology, plan, &remote, &opts, &NoProgress, &CancelToken::new())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`RemoteExecutor`]: runs commands and moves files on a host
//! - [`KeyGenerator`]: source of fresh key material
//! - [`ProgressCallback`]: receives progress updates
//!
//! Private keys only travel inside the plan of the node they belong to and
//! are zeroed when that plan is dropped.

pub mod context;
pub mod desired;
pub mod diff;
pub mod error;
pub mod executor;
pub mod keys;
pub mod naming;
pub mod observed;
pub mod ops;
pub mod planner;
pub mod probe;
pub mod topology;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use context::{CancelToken, KeyGenerator, NoProgress, ProgressCallback, RemoteExecutor};
pub use desired::{DesiredState, NodeSecrets};
pub use diff::{Scope, diff, teardown};
pub use error::{Error, RemoteError, Result, ValidationError};
pub use executor::apply;
pub use keys::{Identity, KeyManager, OsKeyGenerator, PresharedKey, PrivateKey, PublicKey};
pub use observed::{ObservedMesh, ObservedState, Probe};
pub use ops::{Op, OpKind};
pub use planner::{MeshPlan, NodePlan, compute_plan};
pub use probe::{probe, probe_all};
pub use topology::{Connect, Edge, Endpoint, MeshDecl, Node, NodeDecl, Topology, TopologyMode};
pub use types::{CommandOutput, ExecuteOptions, Mode, Outcome, RunReport};
