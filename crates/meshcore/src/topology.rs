//! Topology model: nodes, edges, addresses, and bridge priorities.
//!
//! A [`MeshDecl`] is the parsed declarative description. [`Topology::build`]
//! validates it and resolves the peer shape once into a canonical,
//! symmetric [`Edge`] set. Nothing downstream looks at the raw peer lists.

use crate::error::ValidationError;
use crate::naming;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Default WireGuard listen port.
pub const DEFAULT_PORT: u16 = 51820;

/// Persistent keepalive applied to every peer, in seconds.
pub const KEEPALIVE: u16 = 25;

/// Number of spanning-tree priority bands.
pub const PRIORITY_BANDS: usize = 16;

/// How a host is reached. Opaque to the engine; resolved by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Connect {
    /// `[user@]host[:port]`
    Target(String),
    /// Explicit connection options
    Options {
        host: String,
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        identity_file: Option<String>,
    },
}

impl Connect {
    /// Host part, for display.
    pub fn host(&self) -> &str {
        match self {
            Self::Target(target) => {
                let host = target.rsplit_once('@').map_or(target.as_str(), |(_, h)| h);
                match host.rsplit_once(':') {
                    Some((h, port)) if !h.contains(':') && port.parse::<u16>().is_ok() => h,
                    _ => host,
                }
            }
            Self::Options { host, .. } => host,
        }
    }
}

/// A WireGuard endpoint: host name or address plus port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl Endpoint {
    /// Parse `host`, `host:port`, `[v6]:port` or a bare IPv6 literal.
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("empty endpoint".to_string());
        }

        let (host, port) = if let Some(rest) = value.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| "unterminated '['".to_string())?;
            match tail {
                "" => (host, None),
                _ => {
                    let port = tail
                        .strip_prefix(':')
                        .ok_or_else(|| format!("unexpected '{tail}' after ']'"))?;
                    (host, Some(port))
                }
            }
        } else if value.matches(':').count() > 1 {
            (value, None)
        } else if let Some((host, port)) = value.split_once(':') {
            (host, Some(port))
        } else {
            (value, None)
        };

        if host.is_empty() {
            return Err("empty host".to_string());
        }
        let port = port
            .map(|p| match p.parse::<u16>() {
                Ok(0) | Err(_) => Err(format!("invalid port '{p}'")),
                Ok(port) => Ok(port),
            })
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The host as an IP literal, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bracket = self.host.contains(':');
        match (bracket, self.port) {
            (true, Some(port)) => write!(f, "[{}]:{port}", self.host),
            (false, Some(port)) => write!(f, "{}:{port}", self.host),
            (_, None) => f.write_str(&self.host),
        }
    }
}

/// Declared mesh, as parsed from the mesh file.
#[derive(Debug, Clone)]
pub struct MeshDecl {
    pub name: String,
    /// Bridge network prefix
    pub network: String,
    /// Peer every pair of nodes
    pub full: bool,
    /// WireGuard transit prefix; derived from the name when absent
    pub transit: Option<String>,
    /// Nodes in declaration order
    pub nodes: Vec<NodeDecl>,
}

/// Declared node.
#[derive(Debug, Clone)]
pub struct NodeDecl {
    pub name: String,
    /// Bridge address, with or without prefix length
    pub addr: String,
    pub connect: Connect,
    /// `host[:port]`
    pub endpoint: String,
    pub listen_port: Option<u16>,
    /// Priority band offset, -8..=7
    pub prio: Option<i32>,
    /// Explicit peers, honoured only without full-mesh
    pub peers: Vec<String>,
    /// Free-form metadata rendered into peers' configuration
    pub meta: Option<serde_json::Value>,
}

/// How edges were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TopologyMode {
    /// Every pair of nodes is an edge
    FullMesh,
    /// Edges come from (symmetrized) peer lists
    Explicit,
}

/// Unordered pair of node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    low: usize,
    high: usize,
}

impl Edge {
    /// Edge between `a` and `b`, in either order.
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    pub fn ends(&self) -> (usize, usize) {
        (self.low, self.high)
    }

    /// The end opposite `index`, if `index` is an end.
    pub fn other(&self, index: usize) -> Option<usize> {
        if index == self.low {
            Some(self.high)
        } else if index == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.low == index || self.high == index
    }
}

/// A validated mesh node.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    /// Declaration index
    pub index: usize,
    pub connect: Connect,
    /// Bridge address with prefix length
    pub address: IpNet,
    /// Endpoint peers dial, port always resolved
    pub endpoint: Endpoint,
    pub listen_port: u16,
    /// Priority band offset, -8..=7
    pub prio: i8,
    /// WireGuard transit address with the transit prefix length
    pub transit: IpNet,
    pub interface: String,
    pub bridge: String,
    pub meta: Option<serde_json::Value>,
}

impl Node {
    /// Spanning-tree bridge priority, `32768 + 4096 * prio`.
    pub fn bridge_priority(&self) -> u16 {
        bridge_priority(self.prio)
    }

    /// Transit address as a single-host prefix, used for allowed-ips.
    pub fn transit_host(&self) -> IpNet {
        IpNet::from(self.transit.addr())
    }
}

/// Default priority band offset for the node at `index`.
///
/// Monotonic in declaration order and repeating every 16 nodes; the first
/// node gets the lowest band.
pub fn default_priority(index: usize) -> i8 {
    -8 + (index % PRIORITY_BANDS) as i8
}

/// Bridge priority for a band offset.
pub fn bridge_priority(prio: i8) -> u16 {
    (32768 + 4096 * i32::from(prio)) as u16
}

/// Validated mesh topology.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub name: String,
    pub network: IpNet,
    pub transit: IpNet,
    pub mode: TopologyMode,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Topology {
    /// Validate a declaration and derive the edge set.
    pub fn build(decl: &MeshDecl) -> Result<Self, ValidationError> {
        validate_name("mesh", &decl.name, false)?;
        if decl.nodes.is_empty() {
            return Err(ValidationError::EmptyMesh {
                mesh: decl.name.clone(),
            });
        }

        let network = parse_net("mesh network", &decl.network)?.trunc();
        let transit = match &decl.transit {
            Some(t) => parse_net("transit network", t)?.trunc(),
            None => naming::default_transit(&decl.name),
        };
        if transit.contains(&network.network()) || network.contains(&transit.network()) {
            return Err(ValidationError::TransitOverlap { transit, network });
        }

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        let mut by_addr: HashMap<IpAddr, &str> = HashMap::new();
        let mut nodes = Vec::with_capacity(decl.nodes.len());

        for (index, nd) in decl.nodes.iter().enumerate() {
            validate_name("node", &nd.name, true)?;
            if by_name.insert(nd.name.as_str(), index).is_some() {
                return Err(ValidationError::DuplicateName {
                    name: nd.name.clone(),
                });
            }

            let address = parse_address(&nd.name, &nd.addr, &network)?;
            if let Some(first) = by_addr.insert(address.addr(), nd.name.as_str()) {
                return Err(ValidationError::DuplicateAddress {
                    address: address.addr(),
                    first: first.to_string(),
                    second: nd.name.clone(),
                });
            }

            let mut endpoint =
                Endpoint::parse(&nd.endpoint).map_err(|reason| ValidationError::InvalidEndpoint {
                    node: nd.name.clone(),
                    value: nd.endpoint.clone(),
                    reason,
                })?;
            if nd.listen_port == Some(0) {
                return Err(ValidationError::InvalidEndpoint {
                    node: nd.name.clone(),
                    value: nd.endpoint.clone(),
                    reason: "listen port 0".to_string(),
                });
            }
            let listen_port = nd.listen_port.or(endpoint.port).unwrap_or(DEFAULT_PORT);
            endpoint.port = Some(endpoint.port.unwrap_or(listen_port));

            let prio = match nd.prio {
                None => default_priority(index),
                Some(p) if (-8..=7).contains(&p) => p as i8,
                Some(p) => {
                    return Err(ValidationError::InvalidPriority {
                        node: nd.name.clone(),
                        prio: p,
                    });
                }
            };

            let transit_addr = nth_host(&transit, index as u128 + 1).ok_or(
                ValidationError::TransitExhausted {
                    transit,
                    nodes: decl.nodes.len(),
                },
            )?;
            let transit_net = IpNet::new(transit_addr, transit.prefix_len()).map_err(|e| {
                ValidationError::InvalidAddress {
                    context: "transit network".to_string(),
                    value: transit.to_string(),
                    reason: e.to_string(),
                }
            })?;

            nodes.push(Node {
                name: nd.name.clone(),
                index,
                connect: nd.connect.clone(),
                address,
                endpoint,
                listen_port,
                prio,
                transit: transit_net,
                interface: naming::interface_name(&decl.name, index),
                bridge: naming::bridge_name(&decl.name, index),
                meta: nd.meta.clone(),
            });
        }

        let (mode, edges) = if decl.full {
            for nd in decl.nodes.iter().filter(|n| !n.peers.is_empty()) {
                log::warn!(
                    "node '{}' lists peers but the mesh is full; the list is ignored",
                    nd.name
                );
            }
            let n = nodes.len();
            let edges = (0..n)
                .flat_map(|a| (a + 1..n).map(move |b| Edge::new(a, b)))
                .collect::<Vec<_>>();
            (TopologyMode::FullMesh, edges)
        } else {
            let mut set = BTreeSet::new();
            for (index, nd) in decl.nodes.iter().enumerate() {
                for peer in &nd.peers {
                    let other = *by_name.get(peer.as_str()).ok_or_else(|| {
                        ValidationError::UnknownPeer {
                            node: nd.name.clone(),
                            peer: peer.clone(),
                        }
                    })?;
                    if other == index {
                        return Err(ValidationError::SelfPeer {
                            node: nd.name.clone(),
                        });
                    }
                    set.insert(Edge::new(index, other));
                }
            }
            (TopologyMode::Explicit, set.into_iter().collect())
        };

        let topology = Self {
            name: decl.name.clone(),
            network,
            transit,
            mode,
            nodes,
            edges,
        };
        topology.check_link_names()?;

        log::debug!(
            "mesh '{}': {} nodes, {} edges ({:?})",
            topology.name,
            topology.nodes.len(),
            topology.edges.len(),
            topology.mode
        );
        Ok(topology)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Look a node up by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Edges touching the node at `index`, in edge order.
    pub fn edges_of(&self, index: usize) -> impl Iterator<Item = Edge> + '_ {
        self.edges.iter().copied().filter(move |e| e.contains(index))
    }

    /// Neighbours of the node at `index`.
    pub fn peers_of(&self, index: usize) -> Vec<&Node> {
        self.edges_of(index)
            .filter_map(|e| e.other(index))
            .map(|i| &self.nodes[i])
            .collect()
    }

    /// Tunnel link on `local` toward `remote`.
    pub fn tunnel_name(&self, local: usize, remote: usize) -> String {
        naming::tunnel_name(&self.name, local, remote)
    }

    fn check_link_names(&self) -> Result<(), ValidationError> {
        for node in &self.nodes {
            let mut seen = HashSet::new();
            let names = [node.interface.clone(), node.bridge.clone()]
                .into_iter()
                .chain(
                    self.peers_of(node.index)
                        .into_iter()
                        .map(|peer| self.tunnel_name(node.index, peer.index)),
                );
            for name in names {
                if !seen.insert(name.clone()) {
                    return Err(ValidationError::LinkNameCollision {
                        name,
                        node: node.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn validate_name(what: &'static str, name: &str, allow_dot: bool) -> Result<(), ValidationError> {
    let valid = !name.is_empty()
        && !name.starts_with(['-', '.'])
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_dot && c == '.'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidName {
            what,
            name: name.to_string(),
        })
    }
}

fn parse_net(context: &str, value: &str) -> Result<IpNet, ValidationError> {
    value
        .trim()
        .parse::<IpNet>()
        .map_err(|e| ValidationError::InvalidAddress {
            context: context.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn parse_address(node: &str, value: &str, network: &IpNet) -> Result<IpNet, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidAddress {
        context: format!("node '{node}'"),
        value: value.to_string(),
        reason,
    };

    let value = value.trim();
    let address = if value.contains('/') {
        value.parse::<IpNet>().map_err(|e| invalid(e.to_string()))?
    } else {
        let ip = value
            .parse::<IpAddr>()
            .map_err(|e| invalid(e.to_string()))?;
        IpNet::new(ip, network.prefix_len()).map_err(|e| invalid(e.to_string()))?
    };

    if !network.contains(&address.addr()) {
        return Err(ValidationError::OutsideNetwork {
            node: node.to_string(),
            address,
            network: *network,
        });
    }
    Ok(address)
}

/// The `n`th address of `net`, skipping the IPv4 broadcast address.
fn nth_host(net: &IpNet, n: u128) -> Option<IpAddr> {
    let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
    let size = 1u128.checked_shl(host_bits).unwrap_or(u128::MAX);
    let usable = match net {
        IpNet::V4(_) => size.saturating_sub(1),
        IpNet::V6(_) => size,
    };
    if n == 0 || n >= usable {
        return None;
    }
    match net.network() {
        IpAddr::V4(base) => {
            let n = u32::try_from(n).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(u32::from(base).checked_add(n)?)))
        }
        IpAddr::V6(base) => Some(IpAddr::V6(Ipv6Addr::from(u128::from(base).checked_add(n)?))),
    }
}
