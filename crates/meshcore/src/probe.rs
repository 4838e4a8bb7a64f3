//! Remote state prober.
//!
//! Read-only queries against one host: `ip -j` for links and addresses,
//! `wg show` field by field for the interface (never `dump`, which includes
//! the private key), and the mesh's files under `/etc/wireguard`. Preshared
//! keys are reduced to presence on the host before the output is returned.

use crate::context::{ProgressCallback, RemoteExecutor};
use crate::error::{Error, RemoteError};
use crate::keys::PublicKey;
use crate::naming;
use crate::observed::{
    ObservedBridge, ObservedInterface, ObservedMesh, ObservedPeer, ObservedState, ObservedTunnel,
    Probe, StoredFiles, TunnelKind,
};
use crate::topology::{Node, Topology};
use crate::types::{ExecuteOptions, Outcome};
use ipnet::IpNet;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

pub(crate) const SECTION: &str = "@@wgmesh@@";

#[derive(Debug, Deserialize)]
struct LinkJson {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    master: Option<String>,
    #[serde(default)]
    linkinfo: Option<LinkInfoJson>,
}

#[derive(Debug, Deserialize)]
struct LinkInfoJson {
    #[serde(default)]
    info_kind: Option<String>,
    #[serde(default)]
    info_data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AddrJson {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<AddrInfoJson>,
}

#[derive(Debug, Deserialize)]
struct AddrInfoJson {
    local: IpAddr,
    prefixlen: u8,
    #[serde(default)]
    scope: Option<String>,
}

/// A link as reported by `ip -d -j link show`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    name: String,
    kind: Option<String>,
    up: bool,
    master: Option<String>,
    local: Option<IpAddr>,
    remote: Option<IpAddr>,
    stp: bool,
    priority: Option<u16>,
}

fn parse_links(json: &str) -> Result<Vec<Link>, serde_json::Error> {
    let links: Vec<LinkJson> = serde_json::from_str(json)?;
    Ok(links
        .into_iter()
        .map(|link| {
            let (kind, data) = match link.linkinfo {
                Some(info) => (info.info_kind, info.info_data),
                None => (None, None),
            };
            let field = |key: &str| data.as_ref().and_then(|d| d.get(key));
            Link {
                up: link.flags.iter().any(|f| f == "UP"),
                local: field("local").and_then(|v| v.as_str()?.parse().ok()),
                remote: field("remote").and_then(|v| v.as_str()?.parse().ok()),
                stp: field("stp_state").and_then(serde_json::Value::as_u64).unwrap_or(0) != 0,
                priority: field("priority")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|p| u16::try_from(p).ok()),
                name: link.ifname,
                kind,
                master: link.master,
            }
        })
        .collect())
}

/// Global-scope addresses per link.
fn parse_addresses(json: &str) -> Result<HashMap<String, Vec<IpNet>>, serde_json::Error> {
    let entries: Vec<AddrJson> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let addrs = entry
                .addr_info
                .into_iter()
                .filter(|a| a.scope.as_deref() != Some("link"))
                .filter_map(|a| IpNet::new(a.local, a.prefixlen).ok())
                .collect();
            (entry.ifname, addrs)
        })
        .collect())
}

/// Script printing the interface fields, one section each.
fn wg_script(interface: &str) -> String {
    [
        format!("wg show {interface} listen-port"),
        format!("wg show {interface} public-key"),
        format!("wg show {interface} endpoints"),
        format!("wg show {interface} allowed-ips"),
        format!("wg show {interface} persistent-keepalive"),
        format!(
            "wg show {interface} preshared-keys | awk '{{ print $1, ($2 == \"(none)\" ? \"none\" : \"set\") }}'"
        ),
    ]
    .join(&format!(" && echo {SECTION} && "))
}

/// Per-peer value column of a `wg show <if> <field>` listing.
fn peer_column(section: &str) -> Result<Vec<(PublicKey, String)>, String> {
    section
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or_default();
            let key = PublicKey::from_base64(key).map_err(|e| format!("peer key '{key}': {e}"))?;
            Ok((key, parts.collect::<Vec<_>>().join(" ")))
        })
        .collect()
}

fn find_peer<'a>(peers: &'a mut [ObservedPeer], key: &PublicKey) -> Option<&'a mut ObservedPeer> {
    peers.iter_mut().find(|p| &p.public_key == key)
}

fn parse_wg(
    name: &str,
    output: &str,
) -> Result<(Option<u16>, Option<PublicKey>, Vec<ObservedPeer>), String> {
    let sections: Vec<&str> = output.split(&format!("{SECTION}\n")).collect();
    let [port, public, endpoints, allowed, keepalive, preshared] = sections.as_slice() else {
        return Err(format!(
            "expected 6 sections from wg show {name}, got {}",
            sections.len()
        ));
    };

    let listen_port = port.trim().parse::<u16>().ok().filter(|p| *p != 0);
    let public_key = match public.trim() {
        "" | "(none)" => None,
        key => Some(PublicKey::from_base64(key).map_err(|e| e.to_string())?),
    };

    let mut peers: Vec<ObservedPeer> = peer_column(endpoints)?
        .into_iter()
        .map(|(public_key, endpoint)| ObservedPeer {
            public_key,
            endpoint: (endpoint != "(none)" && !endpoint.is_empty()).then_some(endpoint),
            allowed_ips: Vec::new(),
            preshared: false,
            keepalive: None,
        })
        .collect();

    for (key, ips) in peer_column(allowed)? {
        if let Some(peer) = find_peer(&mut peers, &key) {
            peer.allowed_ips = ips
                .split_whitespace()
                .filter_map(|ip| ip.parse().ok())
                .collect();
        }
    }
    for (key, value) in peer_column(keepalive)? {
        if let Some(peer) = find_peer(&mut peers, &key) {
            peer.keepalive = value.parse().ok();
        }
    }
    for (key, value) in peer_column(preshared)? {
        if let Some(peer) = find_peer(&mut peers, &key) {
            peer.preshared = value == "set";
        }
    }

    Ok((listen_port, public_key, peers))
}

fn files_script(interface: &str) -> String {
    let key = naming::key_path(interface);
    let dir = naming::CONFIG_DIR;
    format!(
        "if [ -f {key} ]; then wg pubkey < {key}; fi; echo {SECTION}; \
         for f in {dir}/{interface}.*.psk; do [ -e \"$f\" ] && basename \"$f\"; done; true"
    )
}

fn parse_files(interface: &str, output: &str) -> Result<(Option<PublicKey>, BTreeSet<String>), String> {
    let (key, psks) = output
        .split_once(&format!("{SECTION}\n"))
        .ok_or_else(|| "missing section marker in file listing".to_string())?;
    let key = match key.trim() {
        "" => None,
        k => Some(PublicKey::from_base64(k).map_err(|e| format!("stored key: {e}"))?),
    };
    let peers = psks
        .lines()
        .filter_map(|f| naming::preshared_peer(interface, f.trim()))
        .map(ToString::to_string)
        .collect();
    Ok((key, peers))
}

fn remote_failure(node: &Node, err: RemoteError) -> Error {
    match err {
        RemoteError::CommandFailed { stderr, status } => Error::CommandFailed {
            node: node.name.clone(),
            step: "probe".to_string(),
            stderr: format!("exit status {status}: {stderr}"),
        },
        other => Error::Unreachable {
            node: node.name.clone(),
            message: other.to_string(),
        },
    }
}

/// Collect the observed state of `node`.
pub fn observe<R: RemoteExecutor + ?Sized>(
    remote: &R,
    topology: &Topology,
    node: &Node,
) -> Result<ObservedState, Error> {
    let fail = |e| remote_failure(node, e);
    let bad = |message: String| Error::Probe {
        node: node.name.clone(),
        message,
    };

    let links = remote
        .run_checked(node, "ip -d -j link show")
        .map_err(fail)?;
    let links = parse_links(&links).map_err(|e| bad(format!("ip link: {e}")))?;
    let addrs = remote
        .run_checked(node, "ip -j address show")
        .map_err(fail)?;
    let mut addrs = parse_addresses(&addrs).map_err(|e| bad(format!("ip address: {e}")))?;

    let expected_tunnels: BTreeSet<String> = topology
        .peers_of(node.index)
        .iter()
        .map(|peer| topology.tunnel_name(node.index, peer.index))
        .collect();

    let mut state = ObservedState::default();

    if let Some(link) = links
        .iter()
        .find(|l| l.name == node.interface && l.kind.as_deref() == Some("wireguard"))
    {
        let output = remote
            .run_checked(node, &wg_script(&node.interface))
            .map_err(fail)?;
        let (listen_port, public_key, peers) = parse_wg(&node.interface, &output).map_err(bad)?;
        state.interface = Some(ObservedInterface {
            name: link.name.clone(),
            listen_port,
            public_key,
            addresses: addrs.remove(&link.name).unwrap_or_default(),
            up: link.up,
        });
        state.peers = peers;
    }

    state.tunnels = links
        .iter()
        .filter_map(|link| {
            let kind = TunnelKind::from_kind(link.kind.as_deref()?)?;
            let ours = expected_tunnels.contains(&link.name)
                || link.master.as_deref() == Some(node.bridge.as_str());
            ours.then(|| ObservedTunnel {
                name: link.name.clone(),
                kind,
                local: link.local,
                remote: link.remote,
                master: link.master.clone(),
                up: link.up,
            })
        })
        .collect();

    if let Some(link) = links
        .iter()
        .find(|l| l.name == node.bridge && l.kind.as_deref() == Some("bridge"))
    {
        state.bridge = Some(ObservedBridge {
            name: link.name.clone(),
            addresses: addrs.remove(&link.name).unwrap_or_default(),
            stp: link.stp,
            priority: link.priority,
            up: link.up,
            members: links
                .iter()
                .filter(|l| l.master.as_deref() == Some(node.bridge.as_str()))
                .map(|l| l.name.clone())
                .collect(),
        });
    }

    let config = remote
        .read_file(node, &naming::config_path(&node.interface))
        .map_err(fail)?;
    let listing = remote
        .run_checked(node, &files_script(&node.interface))
        .map_err(fail)?;
    let (key, preshared) = parse_files(&node.interface, &listing).map_err(bad)?;
    state.files = StoredFiles {
        config,
        key,
        preshared,
    };

    log::debug!(
        "probed '{}': interface={} peers={} tunnels={} bridge={}",
        node.name,
        state.interface.is_some(),
        state.peers.len(),
        state.tunnels.len(),
        state.bridge.is_some()
    );
    Ok(state)
}

/// Probe one node. Any failure makes the node `Unreachable`.
pub fn probe<R: RemoteExecutor + ?Sized>(remote: &R, topology: &Topology, node: &Node) -> Probe {
    match observe(remote, topology, node) {
        Ok(state) => Probe::Observed(state),
        Err(e) => {
            log::warn!("{e}");
            Probe::Unreachable {
                reason: e.to_string(),
            }
        }
    }
}

/// Probe every node in parallel. One node's failure never affects another.
pub fn probe_all<R, P>(
    remote: &R,
    topology: &Topology,
    opts: &ExecuteOptions,
    progress: &P,
) -> Result<ObservedMesh, Error>
where
    R: RemoteExecutor + ?Sized,
    P: ProgressCallback,
{
    let results: Arc<Mutex<ObservedMesh>> = Arc::new(Mutex::new(ObservedMesh::new()));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| Error::Probe {
            node: String::new(),
            message: format!("failed to create probe thread pool: {e}"),
        })?;

    pool.install(|| {
        topology.nodes().par_iter().for_each(|node| {
            progress.on_node_start(&node.name, 1);
            let result = probe(remote, topology, node);
            let outcome = match &result {
                Probe::Observed(_) => Outcome::Succeeded { applied: 0 },
                Probe::Unreachable { reason } => Outcome::SkippedUnreachable {
                    reason: reason.clone(),
                },
            };
            progress.on_node_complete(&node.name, &outcome);
            match results.lock() {
                Ok(mut locked) => locked.insert(node.name.clone(), result),
                Err(poisoned) => poisoned.into_inner().insert(node.name.clone(), result),
            };
        });
    });

    let mutex = Arc::try_unwrap(results).map_err(|_| Error::Probe {
        node: String::new(),
        message: "probe results still shared".to_string(),
    })?;
    Ok(match mutex.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    })
}
