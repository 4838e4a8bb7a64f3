//! Plan builder: pure diff of desired against observed state
//!
//! Nothing here talks to a host. Given the same inputs the same operations
//! come out, in dependency order, and a converged host yields none.

use crate::desired::{DesiredPeer, DesiredState, NodeSecrets};
use crate::naming;
use crate::observed::{ObservedPeer, ObservedState};
use crate::ops::Op;
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::SocketAddr;

/// How much of the desired state to enforce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Live links and persisted files
    Full,
    /// Persisted files only; live links are left alone
    Persist,
}

/// Operations moving `observed` to `desired`
///
/// `secrets` is consumed: fresh key material ends up inside the
/// install operations and nowhere else.
pub fn diff(
    desired: &DesiredState,
    secrets: NodeSecrets,
    observed: &ObservedState,
    scope: Scope,
) -> Vec<Op> {
    let mut ops = Vec::new();
    let NodeSecrets {
        private_key,
        mut preshared,
    } = secrets;

    // The ownership marker lands before anything else, so a plan that stops
    // halfway leaves a host the next run still recognizes as its own. An
    // incomplete view never replaces a file, but a missing one is written.
    if desired.is_complete() || observed.files.config.is_none() {
        let config = desired.render_config();
        if observed.files.config.as_deref() != Some(config.as_str()) {
            ops.push(Op::WriteConfig {
                path: desired.config_path.clone(),
                content: config,
            });
        }
    }

    if let Some(key) = private_key {
        ops.push(Op::InstallPrivateKey {
            path: desired.key_path.clone(),
            key,
        });
    }
    // Edge keys in peer order
    for peer in &desired.peers {
        if let Some(key) = preshared.remove(&peer.config.name) {
            ops.push(Op::InstallPresharedKey {
                path: peer.config.preshared_path.clone(),
                peer: peer.config.name.clone(),
                key,
            });
        }
    }
    let fresh_psk: BTreeSet<&str> = ops
        .iter()
        .filter_map(|op| match op {
            Op::InstallPresharedKey { peer, .. } => Some(peer.as_str()),
            _ => None,
        })
        .collect();

    if scope == Scope::Full {
        let mut live = diff_live(desired, observed, &fresh_psk);
        ops.append(&mut live);
    }

    ops
}

fn addresses_match(observed: &[IpNet], desired: &IpNet) -> bool {
    observed == std::slice::from_ref(desired)
}

fn endpoint_matches(desired: &DesiredPeer, observed: Option<&str>) -> bool {
    let Some(observed) = observed else {
        return false;
    };
    match desired.endpoint_ip {
        Some(ip) => {
            observed.parse::<SocketAddr>().ok() == Some(SocketAddr::new(ip, desired.endpoint_port))
        }
        // The kernel reports resolved addresses
        None => true,
    }
}

fn peer_matches(desired: &DesiredPeer, observed: &ObservedPeer) -> bool {
    endpoint_matches(desired, observed.endpoint.as_deref())
        && addresses_match(&observed.allowed_ips, &desired.config.allowed_ip)
        && observed.keepalive == Some(desired.config.keepalive)
        && observed.preshared
}

fn diff_live(
    desired: &DesiredState,
    observed: &ObservedState,
    fresh_psk: &BTreeSet<&str>,
) -> Vec<Op> {
    let mut ops = Vec::new();
    let name = &desired.interface;

    // 1. interface
    let interface = observed.interface.as_ref();
    let recreate = interface.is_some_and(|i| i.public_key != Some(desired.public_key));
    let created = interface.is_none() || recreate;
    if recreate {
        log::debug!(
            "{}: interface {name} has a different key, recreating",
            desired.node
        );
        ops.push(Op::RemoveInterface { name: name.clone() });
    }
    match interface {
        Some(current) if !recreate => {
            if current.listen_port != Some(desired.listen_port) {
                ops.push(Op::SetListenPort {
                    name: name.clone(),
                    port: desired.listen_port,
                });
            }
            if !addresses_match(&current.addresses, &desired.address) {
                ops.push(Op::SetInterfaceAddress {
                    name: name.clone(),
                    address: desired.address,
                    stale: current
                        .addresses
                        .iter()
                        .filter(|a| **a != desired.address)
                        .copied()
                        .collect(),
                });
            }
        }
        _ => ops.push(Op::CreateInterface {
            name: name.clone(),
            listen_port: desired.listen_port,
            address: desired.address,
            key_path: desired.key_path.clone(),
        }),
    }

    // 2. peers
    let observed_peers: &[ObservedPeer] = if created { &[] } else { &observed.peers };
    if desired.is_complete() {
        for stale in observed_peers
            .iter()
            .filter(|o| !desired.peers.iter().any(|d| d.config.public_key == o.public_key))
        {
            ops.push(Op::RemovePeer {
                interface: name.clone(),
                public_key: stale.public_key,
            });
        }
    }
    for peer in &desired.peers {
        match observed_peers
            .iter()
            .find(|o| o.public_key == peer.config.public_key)
        {
            None => ops.push(Op::AddPeer {
                interface: name.clone(),
                peer: peer.config.clone(),
            }),
            Some(current)
                if !peer_matches(peer, current)
                    || fresh_psk.contains(peer.config.name.as_str()) =>
            {
                ops.push(Op::UpdatePeer {
                    interface: name.clone(),
                    peer: peer.config.clone(),
                });
            }
            Some(_) => {}
        }
    }

    // 3. tunnels
    let wanted: BTreeSet<&str> = desired.tunnels.iter().map(|t| t.name.as_str()).collect();
    let bridge = &desired.bridge;
    for stale in observed
        .tunnels
        .iter()
        .filter(|t| !wanted.contains(t.name.as_str()))
    {
        if let Some(master) = &stale.master {
            ops.push(Op::DetachMember {
                bridge: master.clone(),
                member: stale.name.clone(),
            });
        }
        ops.push(Op::RemoveTunnel {
            name: stale.name.clone(),
        });
    }
    let mut fresh_tunnels = BTreeSet::new();
    for tunnel in &desired.tunnels {
        let current = observed.tunnel(&tunnel.name);
        let matches = current.is_some_and(|c| {
            c.kind == tunnel.kind && c.local == Some(tunnel.local) && c.remote == Some(tunnel.remote)
        });
        if matches {
            continue;
        }
        if let Some(current) = current {
            if let Some(master) = &current.master {
                ops.push(Op::DetachMember {
                    bridge: master.clone(),
                    member: current.name.clone(),
                });
            }
            ops.push(Op::RemoveTunnel {
                name: current.name.clone(),
            });
        }
        ops.push(Op::CreateTunnel {
            name: tunnel.name.clone(),
            kind: tunnel.kind,
            local: tunnel.local,
            remote: tunnel.remote,
        });
        fresh_tunnels.insert(tunnel.name.as_str());
    }

    // 4. bridge membership
    let current_bridge = observed.bridge.as_ref();
    if current_bridge.is_none() {
        ops.push(Op::CreateBridge {
            name: bridge.clone(),
            priority: desired.bridge_priority,
        });
    }
    for tunnel in &desired.tunnels {
        let attached = !fresh_tunnels.contains(tunnel.name.as_str())
            && current_bridge.is_some()
            && observed
                .tunnel(&tunnel.name)
                .is_some_and(|t| t.master.as_deref() == Some(bridge.as_str()));
        if !attached {
            ops.push(Op::AttachMember {
                bridge: bridge.clone(),
                member: tunnel.name.clone(),
            });
        }
    }
    if let Some(current) = current_bridge {
        let removed: BTreeSet<&str> = observed
            .tunnels
            .iter()
            .filter(|t| !wanted.contains(t.name.as_str()))
            .map(|t| t.name.as_str())
            .collect();
        for member in current
            .members
            .iter()
            .filter(|m| !wanted.contains(m.as_str()) && !removed.contains(m.as_str()))
        {
            ops.push(Op::DetachMember {
                bridge: bridge.clone(),
                member: member.clone(),
            });
        }
    }

    // 5. bridge address and spanning tree
    let bridge_addresses = current_bridge.map_or(&[][..], |b| b.addresses.as_slice());
    if !addresses_match(bridge_addresses, &desired.bridge_address) {
        ops.push(Op::SetBridgeAddress {
            bridge: bridge.clone(),
            address: desired.bridge_address,
            stale: bridge_addresses
                .iter()
                .filter(|a| **a != desired.bridge_address)
                .copied()
                .collect(),
        });
    }
    if let Some(current) = current_bridge
        && (!current.stp || current.priority != Some(desired.bridge_priority))
    {
        ops.push(Op::SetBridgeStp {
            bridge: bridge.clone(),
            priority: desired.bridge_priority,
        });
    }

    // 6. links up: interface, tunnels, bridge
    if created || !interface.is_some_and(|i| i.up) {
        ops.push(Op::LinkUp { name: name.clone() });
    }
    for tunnel in &desired.tunnels {
        let up = !fresh_tunnels.contains(tunnel.name.as_str())
            && observed.tunnel(&tunnel.name).is_some_and(|t| t.up);
        if !up {
            ops.push(Op::LinkUp {
                name: tunnel.name.clone(),
            });
        }
    }
    if !current_bridge.is_some_and(|b| b.up) {
        ops.push(Op::LinkUp {
            name: bridge.clone(),
        });
    }

    ops
}

/// Names and paths a teardown works on
#[derive(Debug, Clone)]
pub struct TeardownTarget {
    pub interface: String,
    pub bridge: String,
}

/// Operations tearing a node down
///
/// Without `remove` the interface stays defined but down and every file is
/// kept. With `remove` the interface and every persisted file go.
pub fn teardown(target: &TeardownTarget, observed: &ObservedState, remove: bool) -> Vec<Op> {
    let mut ops = Vec::new();

    for tunnel in &observed.tunnels {
        if let Some(master) = &tunnel.master {
            ops.push(Op::DetachMember {
                bridge: master.clone(),
                member: tunnel.name.clone(),
            });
        }
        ops.push(Op::RemoveTunnel {
            name: tunnel.name.clone(),
        });
    }
    if let Some(bridge) = &observed.bridge {
        ops.push(Op::RemoveBridge {
            name: bridge.name.clone(),
        });
    }
    if let Some(interface) = &observed.interface {
        for peer in &observed.peers {
            ops.push(Op::RemovePeer {
                interface: interface.name.clone(),
                public_key: peer.public_key,
            });
        }
        if remove {
            ops.push(Op::RemoveInterface {
                name: interface.name.clone(),
            });
        } else if interface.up {
            ops.push(Op::LinkDown {
                name: interface.name.clone(),
            });
        }
    }

    if remove {
        let files = &observed.files;
        let mut paths = Vec::new();
        if files.config.is_some() {
            paths.push(naming::config_path(&target.interface));
        }
        if files.key.is_some() {
            paths.push(naming::key_path(&target.interface));
        }
        paths.extend(
            files
                .preshared
                .iter()
                .map(|peer| naming::preshared_path(&target.interface, peer)),
        );
        if !paths.is_empty() {
            ops.push(Op::DeleteConfig { paths });
        }
    }
    log::debug!(
        "teardown of {}/{}: {} operation(s)",
        target.interface,
        target.bridge,
        ops.len()
    );
    ops
}
