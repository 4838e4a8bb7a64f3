//! Execution engine for wgmesh
//!
//! The engine orchestrates one run:
//! 1. Probing - Snapshot every host in parallel
//! 2. Planning - Diff each host against the mesh
//! 3. Executing - Confirm, apply per host, report

pub mod differ;
pub mod executor;
pub mod planner;

pub use executor::{RunOptions, execute};
