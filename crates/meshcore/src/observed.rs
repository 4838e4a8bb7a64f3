//! Observed state: an immutable snapshot of what one host has deployed.

use crate::keys::PublicKey;
use ipnet::IpNet;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

/// Tunnel link type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelKind {
    /// GRE over IPv4 carrying Ethernet
    Gretap,
    /// GRE over IPv6 carrying Ethernet
    Ip6Gretap,
}

impl TunnelKind {
    /// `ip6gretap` when both ends are IPv6, `gretap` otherwise.
    pub fn for_ends(local: IpAddr, remote: IpAddr) -> Self {
        if local.is_ipv6() && remote.is_ipv6() {
            Self::Ip6Gretap
        } else {
            Self::Gretap
        }
    }

    /// Kind as `ip link` names it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gretap => "gretap",
            Self::Ip6Gretap => "ip6gretap",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "gretap" => Some(Self::Gretap),
            "ip6gretap" => Some(Self::Ip6Gretap),
            _ => None,
        }
    }
}

impl fmt::Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live WireGuard interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedInterface {
    pub name: String,
    pub listen_port: Option<u16>,
    /// Public key the kernel reports; the private key is never read
    pub public_key: Option<PublicKey>,
    pub addresses: Vec<IpNet>,
    pub up: bool,
}

/// Live WireGuard peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedPeer {
    pub public_key: PublicKey,
    /// Endpoint as the kernel reports it, e.g. `192.0.2.1:51820`
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNet>,
    /// Whether a preshared key is set; its value is never read
    pub preshared: bool,
    pub keepalive: Option<u16>,
}

/// Live GRE tunnel link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedTunnel {
    pub name: String,
    pub kind: TunnelKind,
    pub local: Option<IpAddr>,
    pub remote: Option<IpAddr>,
    /// Bridge the tunnel is enslaved to
    pub master: Option<String>,
    pub up: bool,
}

/// Live bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedBridge {
    pub name: String,
    pub addresses: Vec<IpNet>,
    pub stp: bool,
    pub priority: Option<u16>,
    pub up: bool,
    /// Every link enslaved to the bridge, tunnels or not
    pub members: Vec<String>,
}

/// Files this mesh keeps on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredFiles {
    /// wg-quick configuration, verbatim
    pub config: Option<String>,
    /// Public half of the stored private key, computed on the host
    pub key: Option<PublicKey>,
    /// Peers that have a stored preshared key file
    pub preshared: BTreeSet<String>,
}

impl StoredFiles {
    pub fn is_empty(&self) -> bool {
        self.config.is_none() && self.key.is_none() && self.preshared.is_empty()
    }
}

/// Everything one probe found on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservedState {
    pub interface: Option<ObservedInterface>,
    pub peers: Vec<ObservedPeer>,
    pub tunnels: Vec<ObservedTunnel>,
    pub bridge: Option<ObservedBridge>,
    pub files: StoredFiles,
}

/// First line of every configuration file this mesh writes.
pub fn ownership_marker(mesh: &str, node: &str) -> String {
    format!("# wgmesh mesh={mesh} node={node}")
}

impl ObservedState {
    /// Nothing of this mesh is present, live or persisted.
    pub fn is_empty(&self) -> bool {
        self.interface.is_none()
            && self.peers.is_empty()
            && self.tunnels.is_empty()
            && self.bridge.is_none()
            && self.files.is_empty()
    }

    /// Whether the WireGuard interface exists and is up.
    pub fn is_up(&self) -> bool {
        self.interface.as_ref().is_some_and(|i| i.up)
    }

    pub fn peer(&self, key: &PublicKey) -> Option<&ObservedPeer> {
        self.peers.iter().find(|p| &p.public_key == key)
    }

    pub fn tunnel(&self, name: &str) -> Option<&ObservedTunnel> {
        self.tunnels.iter().find(|t| t.name == name)
    }

    /// Why this host's deployment cannot be claimed by `mesh`/`node`, if it cannot.
    ///
    /// A deployment is owned when its configuration file starts with the
    /// ownership marker. Live links without such a file are foreign.
    pub fn foreign_deployment(&self, mesh: &str, node: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let marker = ownership_marker(mesh, node);
        match &self.files.config {
            Some(config) if config.lines().next() == Some(marker.as_str()) => None,
            Some(config) => Some(match config.lines().next() {
                Some(line) if line.starts_with("# wgmesh ") => {
                    format!("configuration belongs to another mesh node ({line})")
                }
                _ => "configuration file was not written by wgmesh".to_string(),
            }),
            None => {
                let mut found = Vec::new();
                if let Some(i) = &self.interface {
                    found.push(format!("interface {}", i.name));
                }
                if let Some(b) = &self.bridge {
                    found.push(format!("bridge {}", b.name));
                }
                if !self.tunnels.is_empty() {
                    found.push(format!("{} tunnel(s)", self.tunnels.len()));
                }
                if self.files.key.is_some() {
                    found.push("private key file".to_string());
                }
                Some(format!("found {} without a configuration file", found.join(", ")))
            }
        }
    }
}

/// Result of probing one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Probe {
    Observed(ObservedState),
    Unreachable { reason: String },
}

impl Probe {
    pub fn observed(&self) -> Option<&ObservedState> {
        match self {
            Self::Observed(state) => Some(state),
            Self::Unreachable { .. } => None,
        }
    }
}

/// Probe results keyed by node name.
pub type ObservedMesh = BTreeMap<String, Probe>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_kind_for_ends() {
        let v6: IpAddr = "fd00::1".parse().unwrap();
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(TunnelKind::for_ends(v6, v6), TunnelKind::Ip6Gretap);
        assert_eq!(TunnelKind::for_ends(v4, v6), TunnelKind::Gretap);
        assert_eq!(TunnelKind::for_ends(v4, v4), TunnelKind::Gretap);
    }

    #[test]
    fn test_empty_state_is_not_foreign() {
        assert_eq!(ObservedState::default().foreign_deployment("lab", "n0"), None);
    }

    #[test]
    fn test_owned_config_is_not_foreign() {
        let state = ObservedState {
            files: StoredFiles {
                config: Some(format!("{}\n[Interface]\n", ownership_marker("lab", "n0"))),
                ..StoredFiles::default()
            },
            ..ObservedState::default()
        };
        assert_eq!(state.foreign_deployment("lab", "n0"), None);
        assert!(
            state
                .foreign_deployment("lab", "n1")
                .unwrap()
                .contains("another mesh node")
        );
    }

    #[test]
    fn test_live_interface_without_config_is_foreign() {
        let state = ObservedState {
            interface: Some(ObservedInterface {
                name: "wg-lab0".into(),
                listen_port: Some(51820),
                public_key: None,
                addresses: Vec::new(),
                up: true,
            }),
            ..ObservedState::default()
        };
        let reason = state.foreign_deployment("lab", "n0").unwrap();
        assert!(reason.contains("interface wg-lab0"));
    }
}
