//! Probe hosts and build the mesh plan

use anyhow::{Context, Result};
use log::info;
use meshcore::{
    ExecuteOptions, KeyManager, MeshPlan, Mode, ObservedMesh, OsKeyGenerator, RemoteExecutor,
    Topology, compute_plan, probe_all,
};

use crate::progress::NodeProgress;

/// Probe every host in parallel
pub fn probe<R>(topology: &Topology, remote: &R, jobs: usize, quiet: bool) -> Result<ObservedMesh>
where
    R: RemoteExecutor + ?Sized,
{
    let progress = NodeProgress::new(topology.nodes().len(), "probe", quiet);
    let observed = probe_all(remote, topology, &ExecuteOptions { jobs }, &progress);
    progress.finish();
    observed.context("Failed to probe hosts")
}

/// Compute the plan for `mode`
///
/// Identities and preshared keys are adopted from the probes; anything
/// missing is generated here and lives only inside the returned plan.
pub fn plan(topology: &Topology, observed: &ObservedMesh, mode: Mode) -> MeshPlan {
    let generator = OsKeyGenerator;
    let mut keys = KeyManager::new(&generator);
    let plan = compute_plan(topology, observed, mode, &mut keys);

    let fresh = keys.fresh_identities();
    if fresh > 0 {
        info!("generated {fresh} new node identities");
    }
    plan
}
