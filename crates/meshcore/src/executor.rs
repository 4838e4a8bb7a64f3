//! Apply executor - runs node plans in parallel, each strictly in order

use crate::context::{CancelToken, ProgressCallback, RemoteExecutor};
use crate::error::Error;
use crate::planner::{MeshPlan, NodePlan};
use crate::topology::{Node, Topology};
use crate::types::{ExecuteOptions, Outcome, RunReport};
use rayon::prelude::*;
use std::sync::{Arc, Mutex};

/// Apply a plan across the mesh
///
/// Nodes run concurrently on a pool of `opts.jobs` threads; a node's
/// operations run one after another and the first failure stops that node.
/// Nothing is rolled back. Unreachable and conflicting nodes are reported
/// without being touched.
///
/// The plan is consumed: every operation, and the key material it carries,
/// is dropped as soon as its node finishes.
pub fn apply<R, P>(
    topology: &Topology,
    plan: MeshPlan,
    remote: &R,
    opts: &ExecuteOptions,
    progress: &P,
    cancel: &CancelToken,
) -> Result<RunReport, Error>
where
    R: RemoteExecutor + ?Sized,
    P: ProgressCallback,
{
    let MeshPlan {
        plans,
        unreachable,
        conflicts,
        ..
    } = plan;

    let mut report = RunReport::default();
    for (node, reason) in unreachable {
        report.record(node, Outcome::SkippedUnreachable { reason });
    }
    for (node, reason) in conflicts {
        report.record(node, Outcome::Conflict { reason });
    }

    let results: Arc<Mutex<Vec<(String, Outcome)>>> = Arc::new(Mutex::new(Vec::new()));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| Error::Probe {
            node: String::new(),
            message: format!("failed to create apply thread pool: {e}"),
        })?;

    pool.install(|| {
        plans.into_par_iter().for_each(|node_plan| {
            let name = node_plan.node.clone();
            let outcome = match topology.node(&name) {
                Some(node) => apply_node(node, node_plan, remote, progress, cancel),
                None => Outcome::Failed {
                    step: "plan".to_string(),
                    cause: format!("node '{name}' is not part of mesh '{}'", topology.name),
                },
            };
            push_outcome(&results, name, outcome);
        });
    });

    for (node, outcome) in into_outcomes(results) {
        report.record(node, outcome);
    }
    Ok(report)
}

/// Run one node's operations in order
fn apply_node<R, P>(
    node: &Node,
    plan: NodePlan,
    remote: &R,
    progress: &P,
    cancel: &CancelToken,
) -> Outcome
where
    R: RemoteExecutor + ?Sized,
    P: ProgressCallback,
{
    progress.on_node_start(&node.name, plan.ops.len());
    let mut applied = 0;

    let outcome = 'ops: {
        for op in plan.ops {
            let step = op.describe();
            if cancel.is_cancelled() {
                log::info!("{}: cancelled before '{step}'", node.name);
                break 'ops Outcome::Failed {
                    step,
                    cause: "cancelled".to_string(),
                };
            }

            progress.on_op_start(&node.name, &step);
            log::debug!("{}: {step}", node.name);
            if let Err(e) = op.execute(remote, node) {
                log::warn!("{}: '{step}' failed: {e}", node.name);
                break 'ops Outcome::Failed {
                    step,
                    cause: e.to_string(),
                };
            }
            applied += 1;
        }
        Outcome::Succeeded { applied }
    };

    progress.on_node_complete(&node.name, &outcome);
    outcome
}

/// Push an outcome, tolerating a poisoned mutex
fn push_outcome(results: &Arc<Mutex<Vec<(String, Outcome)>>>, node: String, outcome: Outcome) {
    match results.lock() {
        Ok(mut locked) => locked.push((node, outcome)),
        Err(poisoned) => poisoned.into_inner().push((node, outcome)),
    }
}

/// Unwrap collected outcomes, tolerating a poisoned mutex
fn into_outcomes(results: Arc<Mutex<Vec<(String, Outcome)>>>) -> Vec<(String, Outcome)> {
    let mutex = match Arc::try_unwrap(results) {
        Ok(mutex) => mutex,
        Err(shared) => {
            let mut locked = match shared.lock() {
                Ok(locked) => locked,
                Err(poisoned) => poisoned.into_inner(),
            };
            return std::mem::take(&mut *locked);
        }
    };
    match mutex.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    }
}
