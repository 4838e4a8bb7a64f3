//! Test doubles: deterministic keys, mesh fixtures, and a simulated host.
//!
//! [`FakeHost`] interprets exactly the commands this crate issues, probe
//! scripts included, against an [`ObservedState`]. [`FakeRemote`] puts a set
//! of them behind [`RemoteExecutor`] and records everything it is asked to do.

use crate::context::{CancelToken, KeyGenerator, RemoteExecutor};
use crate::error::RemoteError;
use crate::keys::{KEY_SIZE, PresharedKey, PrivateKey, PublicKey};
use crate::observed::{
    ObservedBridge, ObservedInterface, ObservedPeer, ObservedState, ObservedTunnel, TunnelKind,
};
use crate::ops::Op;
use crate::probe::SECTION;
use crate::topology::{Connect, MeshDecl, Node, NodeDecl, Topology};
use crate::types::CommandOutput;
use base64::Engine;
use ipnet::IpNet;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Key generator handing out distinct, predictable keys.
#[derive(Debug, Default)]
pub struct SeededKeys {
    counter: AtomicU8,
}

impl SeededKeys {
    fn next(&self) -> [u8; KEY_SIZE] {
        [self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(100); KEY_SIZE]
    }
}

impl KeyGenerator for SeededKeys {
    fn generate_keypair(&self) -> (PrivateKey, PublicKey) {
        let private = PrivateKey::from_bytes(self.next());
        let public = private.public_key();
        (private, public)
    }

    fn generate_preshared(&self) -> PresharedKey {
        PresharedKey::from_bytes(self.next())
    }
}

/// Mesh `lab` with `n` nodes `n0..`, bridge addresses `fd00::1..`.
pub fn mesh_decl(n: usize, full: bool) -> MeshDecl {
    MeshDecl {
        name: "lab".to_string(),
        network: "fd00::/64".to_string(),
        full,
        transit: None,
        nodes: (0..n)
            .map(|i| NodeDecl {
                name: format!("n{i}"),
                addr: format!("fd00::{:x}/64", i + 1),
                connect: Connect::Target(format!("root@n{i}.example")),
                endpoint: format!("198.51.100.{}", i + 1),
                listen_port: None,
                prio: None,
                peers: Vec::new(),
                meta: None,
            })
            .collect(),
    }
}

pub fn two_node_topology() -> Topology {
    Topology::build(&mesh_decl(2, true)).expect("valid fixture")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Peer name of a `{iface}.{peer}.psk` path.
fn psk_peer(path: &str) -> Option<&str> {
    file_name(path).strip_suffix(".psk")?.split_once('.').map(|(_, peer)| peer)
}

fn flags(up: bool) -> Value {
    if up { json!(["UP", "LOWER_UP"]) } else { json!([]) }
}

fn addr_info(addresses: &[IpNet]) -> Value {
    addresses
        .iter()
        .map(|a| json!({"local": a.addr().to_string(), "prefixlen": a.prefix_len(), "scope": "global"}))
        .collect()
}

/// A host simulated in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub state: ObservedState,
}

impl FakeHost {
    /// Apply one operation, panicking if the host rejects it.
    pub fn apply(&mut self, op: &Op) {
        let result = match op {
            Op::InstallPrivateKey { path, key } => self.write(path, key.to_base64().as_bytes()),
            Op::InstallPresharedKey { path, key, .. } => {
                self.write(path, key.to_base64().as_bytes())
            }
            Op::WriteConfig { path, content } => self.write(path, content.as_bytes()),
            other => match other.command() {
                Some(command) => self.run(&command).map(|_| ()),
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            panic!("{op} rejected: {e}");
        }
    }

    pub fn write(&mut self, path: &str, content: &[u8]) -> Result<(), String> {
        let files = &mut self.state.files;
        if path.ends_with(".key") {
            let text = String::from_utf8_lossy(content);
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map_err(|e| e.to_string())?;
            let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| "bad key length")?;
            files.key = Some(PrivateKey::from_bytes(bytes).public_key());
        } else if let Some(peer) = psk_peer(path) {
            files.preshared.insert(peer.to_string());
        } else if path.ends_with(".conf") {
            files.config = Some(String::from_utf8_lossy(content).to_string());
        } else {
            return Err(format!("unexpected path {path}"));
        }
        Ok(())
    }

    /// Run a command, returning stdout or stderr.
    pub fn run(&mut self, command: &str) -> Result<String, String> {
        if command.starts_with("wg show ") {
            return Ok(self.wg_show());
        }
        if command.contains("wg pubkey") {
            return Ok(self.file_listing(command));
        }
        let mut stdout = String::new();
        for part in command.split(" && ") {
            stdout.push_str(&self.run_one(part)?);
        }
        Ok(stdout)
    }

    fn run_one(&mut self, command: &str) -> Result<String, String> {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            ["ip", "-d", "-j", "link", "show"] => return Ok(self.links_json()),
            ["ip", "-j", "address", "show"] => return Ok(self.addresses_json()),
            _ => {}
        }
        let state = &mut self.state;
        match words.as_slice() {
            ["ip", "link", "add", "dev", name, "type", "wireguard"] => {
                state.interface = Some(ObservedInterface {
                    name: (*name).to_string(),
                    listen_port: None,
                    public_key: None,
                    addresses: Vec::new(),
                    up: false,
                });
                state.peers.clear();
            }
            ["ip", "link", "add", "dev", name, "type", kind, "local", local, "remote", remote] => {
                state.tunnels.push(ObservedTunnel {
                    name: (*name).to_string(),
                    kind: TunnelKind::from_kind(kind).ok_or("unknown link kind")?,
                    local: local.parse().ok(),
                    remote: remote.parse().ok(),
                    master: None,
                    up: false,
                });
            }
            ["ip", "link", "add", "name", name, "type", "bridge", "stp_state", stp, "priority", prio] => {
                state.bridge = Some(ObservedBridge {
                    name: (*name).to_string(),
                    addresses: Vec::new(),
                    stp: *stp == "1",
                    priority: prio.parse().ok(),
                    up: false,
                    members: Vec::new(),
                });
            }
            ["ip", "link", "set", "dev", name, "type", "bridge", "stp_state", stp, "priority", prio] => {
                let bridge = state
                    .bridge
                    .as_mut()
                    .filter(|b| b.name == *name)
                    .ok_or("no such bridge")?;
                bridge.stp = *stp == "1";
                bridge.priority = prio.parse().ok();
            }
            ["ip", "link", "del", "dev", name] => {
                if state.interface.as_ref().is_some_and(|i| i.name == *name) {
                    state.interface = None;
                    state.peers.clear();
                } else if state.bridge.as_ref().is_some_and(|b| b.name == *name) {
                    state.bridge = None;
                    for tunnel in &mut state.tunnels {
                        tunnel.master = None;
                    }
                } else if state.tunnel(name).is_some() {
                    state.tunnels.retain(|t| t.name != *name);
                    if let Some(bridge) = state.bridge.as_mut() {
                        bridge.members.retain(|m| m != name);
                    }
                } else {
                    return Err(format!("Cannot find device \"{name}\""));
                }
            }
            ["ip", "link", "set", "dev", member, "master", bridge] => {
                let target = state
                    .bridge
                    .as_mut()
                    .filter(|b| b.name == *bridge)
                    .ok_or("no such bridge")?;
                target.members.push((*member).to_string());
                if let Some(tunnel) = state.tunnels.iter_mut().find(|t| t.name == *member) {
                    tunnel.master = Some((*bridge).to_string());
                }
            }
            ["ip", "link", "set", "dev", member, "nomaster"] => {
                if let Some(bridge) = state.bridge.as_mut() {
                    bridge.members.retain(|m| m != member);
                }
                if let Some(tunnel) = state.tunnels.iter_mut().find(|t| t.name == *member) {
                    tunnel.master = None;
                }
            }
            ["ip", "link", "set", "dev", name, updown @ ("up" | "down")] => {
                let up = *updown == "up";
                if let Some(i) = state.interface.as_mut().filter(|i| i.name == *name) {
                    i.up = up;
                } else if let Some(b) = state.bridge.as_mut().filter(|b| b.name == *name) {
                    b.up = up;
                } else if let Some(t) = state.tunnels.iter_mut().find(|t| t.name == *name) {
                    t.up = up;
                } else {
                    return Err(format!("Cannot find device \"{name}\""));
                }
            }
            ["ip", "address", verb @ ("add" | "replace" | "del"), address, "dev", name] => {
                let address: IpNet = address.parse().map_err(|_| "bad address")?;
                let addresses = if let Some(i) = state.interface.as_mut().filter(|i| i.name == *name)
                {
                    &mut i.addresses
                } else if let Some(b) = state.bridge.as_mut().filter(|b| b.name == *name) {
                    &mut b.addresses
                } else {
                    return Err(format!("Cannot find device \"{name}\""));
                };
                addresses.retain(|a| *a != address);
                if *verb != "del" {
                    addresses.push(address);
                }
            }
            ["wg", "set", name, "listen-port", port, rest @ ..] => {
                let public_key = state.files.key;
                let interface = state
                    .interface
                    .as_mut()
                    .filter(|i| i.name == *name)
                    .ok_or("No such device")?;
                interface.listen_port = port.parse().ok();
                if let ["private-key", _] = rest {
                    interface.public_key = public_key;
                }
            }
            ["wg", "set", _, "peer", key, "remove"] => {
                let key = PublicKey::from_base64(key).map_err(|e| e.to_string())?;
                state.peers.retain(|p| p.public_key != key);
            }
            [
                "wg",
                "set",
                _,
                "peer",
                key,
                "preshared-key",
                psk,
                "endpoint",
                endpoint,
                "allowed-ips",
                allowed,
                "persistent-keepalive",
                keepalive,
            ] => {
                let public_key = PublicKey::from_base64(key).map_err(|e| e.to_string())?;
                let preshared =
                    psk_peer(psk).is_some_and(|peer| state.files.preshared.contains(peer));
                let peer = ObservedPeer {
                    public_key,
                    endpoint: Some((*endpoint).to_string()),
                    allowed_ips: allowed.split(',').filter_map(|a| a.parse().ok()).collect(),
                    preshared,
                    keepalive: keepalive.parse().ok(),
                };
                match state.peers.iter_mut().find(|p| p.public_key == public_key) {
                    Some(existing) => *existing = peer,
                    None => state.peers.push(peer),
                }
            }
            ["rm", "-f", "--", paths @ ..] => {
                for path in paths {
                    if path.ends_with(".conf") {
                        state.files.config = None;
                    } else if path.ends_with(".key") {
                        state.files.key = None;
                    } else if let Some(peer) = psk_peer(path) {
                        state.files.preshared.remove(peer);
                    }
                }
            }
            _ => return Err(format!("unsupported command: {command}")),
        }
        Ok(String::new())
    }

    fn links_json(&self) -> String {
        let state = &self.state;
        let mut links = Vec::new();
        if let Some(i) = &state.interface {
            links.push(json!({
                "ifname": i.name,
                "flags": flags(i.up),
                "linkinfo": {"info_kind": "wireguard"},
            }));
        }
        for t in &state.tunnels {
            let mut link = json!({
                "ifname": t.name,
                "flags": flags(t.up),
                "linkinfo": {
                    "info_kind": t.kind.as_str(),
                    "info_data": {
                        "local": t.local.map(|a| a.to_string()),
                        "remote": t.remote.map(|a| a.to_string()),
                    },
                },
            });
            if let Some(master) = &t.master {
                link["master"] = json!(master);
            }
            links.push(link);
        }
        if let Some(b) = &state.bridge {
            links.push(json!({
                "ifname": b.name,
                "flags": flags(b.up),
                "linkinfo": {
                    "info_kind": "bridge",
                    "info_data": {"stp_state": u8::from(b.stp), "priority": b.priority},
                },
            }));
            for member in b.members.iter().filter(|m| state.tunnel(m).is_none()) {
                links.push(json!({"ifname": member, "flags": flags(true), "master": b.name}));
            }
        }
        Value::Array(links).to_string()
    }

    fn addresses_json(&self) -> String {
        let state = &self.state;
        let mut entries = Vec::new();
        if let Some(i) = &state.interface {
            entries.push(json!({"ifname": i.name, "addr_info": addr_info(&i.addresses)}));
        }
        if let Some(b) = &state.bridge {
            entries.push(json!({"ifname": b.name, "addr_info": addr_info(&b.addresses)}));
        }
        Value::Array(entries).to_string()
    }

    fn wg_show(&self) -> String {
        let state = &self.state;
        let interface = state.interface.as_ref();
        let sections = [
            format!(
                "{}\n",
                interface.and_then(|i| i.listen_port).unwrap_or(0)
            ),
            format!(
                "{}\n",
                interface
                    .and_then(|i| i.public_key)
                    .map_or_else(|| "(none)".to_string(), |k| k.to_base64())
            ),
            self.per_peer(|p| p.endpoint.clone().unwrap_or_else(|| "(none)".to_string())),
            self.per_peer(|p| {
                p.allowed_ips
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
            self.per_peer(|p| p.keepalive.map_or_else(|| "off".to_string(), |k| k.to_string())),
            self.per_peer(|p| if p.preshared { "set" } else { "none" }.to_string()),
        ];
        sections.join(&format!("{SECTION}\n"))
    }

    fn per_peer(&self, value: impl Fn(&ObservedPeer) -> String) -> String {
        self.state
            .peers
            .iter()
            .map(|p| format!("{}\t{}\n", p.public_key, value(p)))
            .collect()
    }

    fn file_listing(&self, script: &str) -> String {
        let files = &self.state.files;
        let interface = script
            .split("for f in /etc/wireguard/")
            .nth(1)
            .and_then(|rest| rest.split(".*.psk").next())
            .unwrap_or_default();
        let mut out = String::new();
        if let Some(key) = files.key {
            out.push_str(&format!("{key}\n"));
        }
        out.push_str(&format!("{SECTION}\n"));
        for peer in &files.preshared {
            out.push_str(&format!("{interface}.{peer}.psk\n"));
        }
        out
    }
}

#[derive(Debug, Default)]
struct Inner {
    hosts: BTreeMap<String, FakeHost>,
    unreachable: BTreeSet<String>,
    failures: Vec<(String, String)>,
    cancel_on: Option<(String, CancelToken)>,
    commands: BTreeMap<String, Vec<String>>,
    writes: BTreeMap<String, Vec<(String, Vec<u8>, u32)>>,
}

/// Recording remote executor over simulated hosts, keyed by node name.
#[derive(Debug, Default)]
pub struct FakeRemote {
    inner: Mutex<Inner>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_unreachable(&self, node: &str) {
        self.lock().unreachable.insert(node.to_string());
    }

    pub fn set_reachable(&self, node: &str) {
        self.lock().unreachable.remove(node);
    }

    /// Fail every command or write on `node` containing `pattern`.
    pub fn fail_on(&self, node: &str, pattern: &str) {
        self.lock()
            .failures
            .push((node.to_string(), pattern.to_string()));
    }

    /// Stop failing and cancelling; hosts keep their state.
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.failures.clear();
        inner.cancel_on = None;
    }

    /// Cancel `token` once a command containing `pattern` has run.
    pub fn cancel_on(&self, pattern: &str, token: CancelToken) {
        self.lock().cancel_on = Some((pattern.to_string(), token));
    }

    pub fn with_host<T>(&self, node: &str, f: impl FnOnce(&mut FakeHost) -> T) -> T {
        f(self.lock().hosts.entry(node.to_string()).or_default())
    }

    pub fn host(&self, node: &str) -> FakeHost {
        self.with_host(node, |h| h.clone())
    }

    /// Commands run on `node`, in order.
    pub fn commands(&self, node: &str) -> Vec<String> {
        self.lock().commands.get(node).cloned().unwrap_or_default()
    }

    /// Files written to `node`: path, content, mode.
    pub fn writes(&self, node: &str) -> Vec<(String, Vec<u8>, u32)> {
        self.lock().writes.get(node).cloned().unwrap_or_default()
    }

    /// Commands and writes that change state on `node`.
    pub fn mutations(&self, node: &str) -> usize {
        let inner = self.lock();
        let commands = inner.commands.get(node).map_or(0, |c| {
            c.iter()
                .filter(|c| !c.starts_with("ip -") && !c.starts_with("wg show") && !c.contains("wg pubkey"))
                .count()
        });
        commands + inner.writes.get(node).map_or(0, Vec::len)
    }

    fn check(inner: &Inner, node: &str, subject: &str) -> Result<(), RemoteError> {
        if inner.unreachable.contains(node) {
            return Err(RemoteError::Unreachable {
                message: format!("ssh: connect to host {node}: Connection timed out"),
            });
        }
        if inner
            .failures
            .iter()
            .any(|(n, pattern)| n == node && subject.contains(pattern.as_str()))
        {
            return Err(RemoteError::CommandFailed {
                status: 2,
                stderr: format!("simulated failure: {subject}"),
            });
        }
        Ok(())
    }
}

impl RemoteExecutor for FakeRemote {
    fn run(&self, node: &Node, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut inner = self.lock();
        Self::check(&inner, &node.name, command)?;
        inner
            .commands
            .entry(node.name.clone())
            .or_default()
            .push(command.to_string());
        if let Some((pattern, token)) = &inner.cancel_on
            && command.contains(pattern.as_str())
        {
            token.cancel();
        }
        let host = inner.hosts.entry(node.name.clone()).or_default();
        Ok(match host.run(command) {
            Ok(stdout) => CommandOutput::ok(stdout),
            Err(stderr) => CommandOutput {
                status: 1,
                stdout: Vec::new(),
                stderr: stderr.into_bytes(),
            },
        })
    }

    fn write_file(
        &self,
        node: &Node,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        Self::check(&inner, &node.name, path)?;
        inner
            .writes
            .entry(node.name.clone())
            .or_default()
            .push((path.to_string(), content.to_vec(), mode));
        let host = inner.hosts.entry(node.name.clone()).or_default();
        host.write(path, content)
            .map_err(|stderr| RemoteError::CommandFailed { status: 1, stderr })
    }

    fn read_file(&self, node: &Node, path: &str) -> Result<Option<String>, RemoteError> {
        let mut inner = self.lock();
        Self::check(&inner, &node.name, path)?;
        let host = inner.hosts.entry(node.name.clone()).or_default();
        Ok(if path.ends_with(".conf") {
            host.state.files.config.clone()
        } else {
            None
        })
    }
}
