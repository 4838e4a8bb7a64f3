//! Desired state of one node, and its persisted configuration.

use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::naming;
use crate::observed::{TunnelKind, ownership_marker};
use crate::ops::{Op, PeerConfig};
use crate::topology::{KEEPALIVE, Node, Topology};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// A peer whose identity is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPeer {
    pub config: PeerConfig,
    /// Endpoint address when it is an IP literal; hostnames are resolved by `wg`
    pub endpoint_ip: Option<IpAddr>,
    pub endpoint_port: u16,
    pub meta: Option<serde_json::Value>,
}

/// One GRE tunnel toward a neighbour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTunnel {
    pub name: String,
    pub kind: TunnelKind,
    pub local: IpAddr,
    pub remote: IpAddr,
}

/// Everything one node should have deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub mesh: String,
    pub node: String,
    pub interface: String,
    pub listen_port: u16,
    /// Transit address with the transit prefix length
    pub address: IpNet,
    pub public_key: PublicKey,
    pub key_path: String,
    pub config_path: String,
    /// Peers with a known identity, in edge order
    pub peers: Vec<DesiredPeer>,
    /// Neighbours whose identity could not be determined this run
    pub unresolved: Vec<String>,
    pub tunnels: Vec<DesiredTunnel>,
    pub bridge: String,
    pub bridge_address: IpNet,
    pub bridge_priority: u16,
}

/// Secret material this run generated for one node.
///
/// Only ever holds the node's own private key and the keys of its own edges.
#[derive(Debug, Default)]
pub struct NodeSecrets {
    pub private_key: Option<PrivateKey>,
    /// Fresh preshared keys by peer name
    pub preshared: BTreeMap<String, PresharedKey>,
}

impl DesiredState {
    /// Compile the desired state of `node`.
    ///
    /// `identity` is the node's public key; `peer_key` resolves neighbours and
    /// returns `None` for those whose identity is unknown.
    pub fn compile(
        topology: &Topology,
        node: &Node,
        identity: PublicKey,
        peer_key: impl Fn(&Node) -> Option<PublicKey>,
    ) -> Self {
        let mut peers = Vec::new();
        let mut unresolved = Vec::new();
        let mut tunnels = Vec::new();

        for neighbour in topology.peers_of(node.index) {
            let local = node.transit.addr();
            let remote = neighbour.transit.addr();
            tunnels.push(DesiredTunnel {
                name: topology.tunnel_name(node.index, neighbour.index),
                kind: TunnelKind::for_ends(local, remote),
                local,
                remote,
            });

            let Some(public_key) = peer_key(neighbour) else {
                unresolved.push(neighbour.name.clone());
                continue;
            };
            let port = neighbour.endpoint.port.unwrap_or(neighbour.listen_port);
            peers.push(DesiredPeer {
                config: PeerConfig {
                    name: neighbour.name.clone(),
                    public_key,
                    endpoint: neighbour.endpoint.to_string(),
                    allowed_ip: neighbour.transit_host(),
                    keepalive: KEEPALIVE,
                    preshared_path: naming::preshared_path(&node.interface, &neighbour.name),
                },
                endpoint_ip: neighbour.endpoint.ip(),
                endpoint_port: port,
                meta: neighbour.meta.clone(),
            });
        }

        Self {
            mesh: topology.name.clone(),
            node: node.name.clone(),
            interface: node.interface.clone(),
            listen_port: node.listen_port,
            address: node.transit,
            public_key: identity,
            key_path: naming::key_path(&node.interface),
            config_path: naming::config_path(&node.interface),
            peers,
            unresolved,
            tunnels,
            bridge: node.bridge.clone(),
            bridge_address: node.address,
            bridge_priority: node.bridge_priority(),
        }
    }

    /// Whether every neighbour's identity is known.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Render the `wg-quick` configuration for this node.
    ///
    /// The file holds no secrets: keys are loaded from their files by
    /// `PostUp` commands. Tunnel and bridge setup rides along so that
    /// `wg-quick up` restores the whole node.
    pub fn render_config(&self) -> String {
        let mut out = String::new();
        out.push_str(&ownership_marker(&self.mesh, &self.node));
        out.push('\n');
        out.push_str("[Interface]\n");
        out.push_str(&format!("Address = {}\n", self.address));
        out.push_str(&format!("ListenPort = {}\n", self.listen_port));
        out.push_str(&format!(
            "PostUp = wg set %i private-key {}/%i.key\n",
            naming::CONFIG_DIR
        ));
        for peer in &self.peers {
            out.push_str(&format!(
                "PostUp = wg set %i peer {} preshared-key {}\n",
                peer.config.public_key, peer.config.preshared_path
            ));
        }

        let mut up = vec![Op::CreateBridge {
            name: self.bridge.clone(),
            priority: self.bridge_priority,
        }];
        up.push(Op::SetBridgeAddress {
            bridge: self.bridge.clone(),
            address: self.bridge_address,
            stale: Vec::new(),
        });
        for tunnel in &self.tunnels {
            up.push(Op::CreateTunnel {
                name: tunnel.name.clone(),
                kind: tunnel.kind,
                local: tunnel.local,
                remote: tunnel.remote,
            });
            up.push(Op::AttachMember {
                bridge: self.bridge.clone(),
                member: tunnel.name.clone(),
            });
            up.push(Op::LinkUp {
                name: tunnel.name.clone(),
            });
        }
        up.push(Op::LinkUp {
            name: self.bridge.clone(),
        });
        for command in up.iter().filter_map(Op::command) {
            out.push_str(&format!("PostUp = {command}\n"));
        }

        let down = self
            .tunnels
            .iter()
            .map(|t| Op::RemoveTunnel {
                name: t.name.clone(),
            })
            .chain(std::iter::once(Op::RemoveBridge {
                name: self.bridge.clone(),
            }));
        for command in down.filter_map(|op| op.command()) {
            out.push_str(&format!("PreDown = {command}\n"));
        }

        for peer in &self.peers {
            out.push('\n');
            out.push_str("[Peer]\n");
            out.push_str(&format!("# {}\n", peer.config.name));
            if let Some(meta) = &peer.meta {
                out.push_str(&format!("# {meta}\n"));
            }
            out.push_str(&format!("PublicKey = {}\n", peer.config.public_key));
            out.push_str(&format!("AllowedIPs = {}\n", peer.config.allowed_ip));
            out.push_str(&format!("Endpoint = {}\n", peer.config.endpoint));
            out.push_str(&format!(
                "PersistentKeepalive = {}\n",
                peer.config.keepalive
            ));
        }
        out
    }
}
