//! Mesh planner - turns a topology and its probes into per-node plans

use crate::desired::{DesiredState, NodeSecrets};
use crate::diff::{Scope, TeardownTarget, diff, teardown};
use crate::keys::{KeyManager, Preshared, PublicKey};
use crate::observed::{ObservedMesh, ObservedState, Probe};
use crate::ops::Op;
use crate::topology::{Node, Topology};
use crate::types::Mode;
use std::collections::BTreeMap;

/// Ordered operations for one node
///
/// Owns any secret material it carries; consumed by the executor and
/// zeroed when dropped.
#[derive(Debug)]
pub struct NodePlan {
    pub node: String,
    pub ops: Vec<Op>,
}

impl NodePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Plans for every node of a mesh
#[derive(Debug)]
pub struct MeshPlan {
    pub mode: Mode,
    /// Reachable, unconflicted nodes in declaration order
    pub plans: Vec<NodePlan>,
    /// Unreachable nodes and why
    pub unreachable: BTreeMap<String, String>,
    /// Nodes refused because of a foreign deployment
    pub conflicts: BTreeMap<String, String>,
}

impl MeshPlan {
    /// Total number of operations
    pub fn total_ops(&self) -> usize {
        self.plans.iter().map(|p| p.ops.len()).sum()
    }

    /// No node has anything to do
    pub fn is_empty(&self) -> bool {
        self.plans.iter().all(NodePlan::is_empty)
    }

    pub fn plan(&self, node: &str) -> Option<&NodePlan> {
        self.plans.iter().find(|p| p.node == node)
    }
}

fn observed_state<'a>(observed: &'a ObservedMesh, node: &Node) -> Option<&'a ObservedState> {
    observed.get(&node.name).and_then(Probe::observed)
}

/// Adopt identities and preshared keys already deployed on reachable hosts
///
/// A node's identity is the public half of its stored key file. An edge's
/// preshared key is kept only when every reachable end stores it.
fn adopt(topology: &Topology, observed: &ObservedMesh, keys: &mut KeyManager<'_>) {
    for node in topology.nodes() {
        if let Some(key) = observed_state(observed, node).and_then(|s| s.files.key) {
            keys.adopt_observed(&node.name, key);
        }
    }
    for edge in topology.edges() {
        let (a, b) = edge.ends();
        let (a, b) = (&topology.nodes()[a], &topology.nodes()[b]);
        let ends = [(a, b), (b, a)];
        let reachable: Vec<bool> = ends
            .iter()
            .filter_map(|(node, other)| {
                observed_state(observed, node).map(|s| s.files.preshared.contains(&other.name))
            })
            .collect();
        let present = !reachable.is_empty() && reachable.iter().all(|stored| *stored);
        keys.adopt_observed_preshared(*edge, present);
    }
}

/// Compute the plan moving every reachable node to `mode`'s target state
///
/// Unreachable nodes get no plan. On `up` without force, nodes carrying a
/// deployment this mesh does not own are refused. Identities are generated
/// only for reachable nodes that have none, and only a node's own secrets
/// end up in its plan.
pub fn compute_plan(
    topology: &Topology,
    observed: &ObservedMesh,
    mode: Mode,
    keys: &mut KeyManager<'_>,
) -> MeshPlan {
    let mut plan = MeshPlan {
        mode,
        plans: Vec::new(),
        unreachable: BTreeMap::new(),
        conflicts: BTreeMap::new(),
    };

    if !matches!(mode, Mode::Down { .. }) {
        adopt(topology, observed, keys);
    }

    for node in topology.nodes() {
        let state = match observed.get(&node.name) {
            Some(Probe::Observed(state)) => state,
            Some(Probe::Unreachable { reason }) => {
                plan.unreachable.insert(node.name.clone(), reason.clone());
                continue;
            }
            None => {
                plan.unreachable
                    .insert(node.name.clone(), "not probed".to_string());
                continue;
            }
        };

        if mode == (Mode::Up { force: false })
            && let Some(reason) = state.foreign_deployment(&topology.name, &node.name)
        {
            log::warn!("{}: {reason}", node.name);
            plan.conflicts.insert(node.name.clone(), reason);
            continue;
        }

        let ops = match mode {
            Mode::Down { remove } => teardown(
                &TeardownTarget {
                    interface: node.interface.clone(),
                    bridge: node.bridge.clone(),
                },
                state,
                remove,
            ),
            Mode::Up { .. } | Mode::Sync => {
                let scope = if mode == Mode::Sync && !state.is_up() {
                    log::info!("{}: interface not up, refreshing files only", node.name);
                    Scope::Persist
                } else {
                    Scope::Full
                };
                let (desired, secrets) = desire(topology, node, observed, keys);
                diff(&desired, secrets, state, scope)
            }
        };
        log::debug!("{}: {} operation(s)", node.name, ops.len());
        plan.plans.push(NodePlan {
            node: node.name.clone(),
            ops,
        });
    }
    plan
}

/// Desired state of a reachable node plus the fresh secrets it must receive
fn desire(
    topology: &Topology,
    node: &Node,
    observed: &ObservedMesh,
    keys: &mut KeyManager<'_>,
) -> (DesiredState, NodeSecrets) {
    let identity = keys.identity_for(&node.name).clone();
    let mut secrets = NodeSecrets {
        private_key: identity.private_key().cloned(),
        preshared: BTreeMap::new(),
    };

    let mut peer_keys: BTreeMap<String, PublicKey> = BTreeMap::new();
    for edge in topology.edges_of(node.index) {
        let Some(other) = edge.other(node.index).map(|i| &topology.nodes()[i]) else {
            continue;
        };
        if observed_state(observed, other).is_none() {
            log::warn!(
                "{}: identity of unreachable peer '{}' is unknown, leaving it untouched",
                node.name,
                other.name
            );
            continue;
        }
        peer_keys.insert(
            other.name.clone(),
            keys.identity_for(&other.name).public_key(),
        );
        if let Preshared::Fresh(key) = keys.preshared_for(edge) {
            secrets.preshared.insert(other.name.clone(), key.clone());
        }
    }

    let desired = DesiredState::compile(topology, node, identity.public_key(), |peer| {
        peer_keys.get(&peer.name).copied()
    });
    (desired, secrets)
}
