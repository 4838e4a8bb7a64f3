//! `info`: mesh summary as YAML or JSON

use anyhow::{Context as AnyhowContext, Result};
use meshcore::{ObservedMesh, Topology, TopologyMode};
use serde::Serialize;

use super::load_mesh;
use crate::Context;
use crate::cli::InfoArgs;
use crate::engine::planner;

#[derive(Debug, Serialize)]
pub struct MeshInfo {
    pub name: String,
    pub network: String,
    pub transit: String,
    pub full: bool,
    /// Fraction of hosts whose interface is up
    pub is_up: f64,
    /// Fraction of hosts holding a configuration file
    pub config_exists: f64,
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub host: String,
    pub address: String,
    pub transit: String,
    pub endpoint: String,
    pub listen_port: u16,
    pub interface: String,
    pub bridge: String,
    pub priority: u16,
    pub reachable: bool,
    pub is_up: bool,
    pub config_exists: bool,
}

pub fn run(ctx: &Context, args: InfoArgs) -> Result<()> {
    let mesh = load_mesh(ctx)?;
    let observed = planner::probe(&mesh.topology, &mesh.remote, ctx.jobs, ctx.quiet)?;
    let info = collect(&mesh.topology, &observed);

    let rendered = if args.json_out {
        serde_json::to_string_pretty(&info).context("Failed to render JSON")?
    } else {
        serde_yaml::to_string(&info).context("Failed to render YAML")?
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

/// Summarize a probed mesh
///
/// Unreachable hosts count as neither up nor configured.
pub fn collect(topology: &Topology, observed: &ObservedMesh) -> MeshInfo {
    let nodes: Vec<NodeInfo> = topology
        .nodes()
        .iter()
        .map(|node| {
            let state = observed.get(&node.name).and_then(|p| p.observed());
            NodeInfo {
                name: node.name.clone(),
                host: node.connect.host().to_string(),
                address: node.address.to_string(),
                transit: node.transit.to_string(),
                endpoint: node.endpoint.to_string(),
                listen_port: node.listen_port,
                interface: node.interface.clone(),
                bridge: node.bridge.clone(),
                priority: node.bridge_priority(),
                reachable: state.is_some(),
                is_up: state.is_some_and(|s| s.is_up()),
                config_exists: state.is_some_and(|s| s.files.config.is_some()),
            }
        })
        .collect();

    MeshInfo {
        name: topology.name.clone(),
        network: topology.network.to_string(),
        transit: topology.transit.to_string(),
        full: topology.mode == TopologyMode::FullMesh,
        is_up: fraction(&nodes, |n| n.is_up),
        config_exists: fraction(&nodes, |n| n.config_exists),
        nodes,
    }
}

fn fraction(nodes: &[NodeInfo], pred: impl Fn(&NodeInfo) -> bool) -> f64 {
    if nodes.is_empty() {
        return 0.0;
    }
    nodes.iter().filter(|n| pred(n)).count() as f64 / nodes.len() as f64
}
