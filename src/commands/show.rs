//! `show`: print what every host has deployed

use anyhow::Result;
use colored::Colorize;
use meshcore::observed::{ObservedBridge, ObservedInterface, ObservedPeer, StoredFiles};
use meshcore::{ObservedMesh, ObservedState, Probe, PublicKey, Topology};
use std::collections::HashMap;

use super::load_mesh;
use crate::Context;
use crate::engine::planner;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let mesh = load_mesh(ctx)?;
    let topology = &mesh.topology;
    let observed = planner::probe(topology, &mesh.remote, ctx.jobs, ctx.quiet)?;
    let owners = key_owners(&observed);

    ui::header(&format!("Mesh {} ({})", topology.name, topology.network));

    for node in topology.nodes() {
        let target = mesh
            .remote
            .target(&node.name)
            .map_or_else(|| node.connect.host().to_string(), ToString::to_string);
        ui::section(&format!("[{}] {}", node.name, target.dimmed()));

        match observed.get(&node.name) {
            Some(Probe::Observed(state)) => print_state(topology, &node.name, state, &owners),
            Some(Probe::Unreachable { reason }) => {
                println!("  {} unreachable: {reason}", "⚠".yellow());
            }
            None => ui::dim("not probed"),
        }
    }
    Ok(())
}

/// Which node each observed public key belongs to
///
/// Keys come from the live interface and from the stored private key file,
/// so peers are named even on hosts where the interface is down.
pub fn key_owners(observed: &ObservedMesh) -> HashMap<PublicKey, String> {
    let mut owners = HashMap::new();
    for (node, probe) in observed {
        let Some(state) = probe.observed() else {
            continue;
        };
        let live = state.interface.as_ref().and_then(|i| i.public_key);
        for key in live.into_iter().chain(state.files.key) {
            owners.entry(key).or_insert_with(|| node.clone());
        }
    }
    owners
}

fn print_state(
    topology: &Topology,
    node: &str,
    state: &ObservedState,
    owners: &HashMap<PublicKey, String>,
) {
    if state.is_empty() {
        ui::dim("nothing deployed");
        return;
    }

    match &state.interface {
        Some(interface) => print_interface(interface),
        None => ui::kv("interface", &"absent".dimmed().to_string()),
    }
    for peer in &state.peers {
        println!("    {}", peer_line(peer, owners));
    }

    for tunnel in &state.tunnels {
        let ends = match (tunnel.local, tunnel.remote) {
            (Some(local), Some(remote)) => format!("{local} -> {remote}"),
            _ => "no endpoints".to_string(),
        };
        let master = tunnel.master.as_deref().unwrap_or("detached");
        ui::kv(
            "tunnel",
            &format!("{} {} {ends} [{master}] {}", tunnel.name, tunnel.kind, link_state(tunnel.up)),
        );
    }

    if let Some(bridge) = &state.bridge {
        print_bridge(bridge);
    }
    print_files(topology, node, &state.files);
}

fn print_interface(interface: &ObservedInterface) {
    let port = interface
        .listen_port
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    ui::kv(
        "interface",
        &format!("{} port {port} {}", interface.name, link_state(interface.up)),
    );
    if let Some(key) = &interface.public_key {
        ui::kv("public key", &key.to_string());
    }
    for address in &interface.addresses {
        ui::kv("address", &address.to_string());
    }
}

/// One peer: owning node (or the bare key), endpoint, allowed-ips, PSK presence
pub fn peer_line(peer: &ObservedPeer, owners: &HashMap<PublicKey, String>) -> String {
    let who = owners
        .get(&peer.public_key)
        .cloned()
        .unwrap_or_else(|| peer.public_key.to_string());
    let allowed = peer
        .allowed_ips
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let endpoint = peer.endpoint.as_deref().unwrap_or("(none)");
    let psk = if peer.preshared { "psk" } else { "no psk" };
    format!("peer {who} endpoint {endpoint} allowed {allowed} ({psk})")
}

fn print_bridge(bridge: &ObservedBridge) {
    let stp = if bridge.stp { "stp" } else { "no stp" };
    let priority = bridge
        .priority
        .map_or_else(String::new, |p| format!(" priority {p}"));
    ui::kv(
        "bridge",
        &format!("{} {stp}{priority} {}", bridge.name, link_state(bridge.up)),
    );
    for address in &bridge.addresses {
        ui::kv("address", &address.to_string());
    }
    if !bridge.members.is_empty() {
        ui::kv("members", &bridge.members.join(", "));
    }
}

fn print_files(topology: &Topology, node: &str, files: &StoredFiles) {
    if let Some(config) = &files.config {
        let marker = meshcore::observed::ownership_marker(&topology.name, node);
        let owner = if config.lines().next() == Some(marker.as_str()) {
            "owned".green()
        } else {
            "foreign".red()
        };
        ui::kv("config", &owner.to_string());
    }
    if let Some(key) = &files.key {
        ui::kv("stored key", &key.to_string());
    }
    if !files.preshared.is_empty() {
        let peers: Vec<&str> = files.preshared.iter().map(String::as_str).collect();
        ui::kv("psk files", &peers.join(", "));
    }
}

fn link_state(up: bool) -> colored::ColoredString {
    if up { "up".green() } else { "down".yellow() }
}
