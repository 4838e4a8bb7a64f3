//! Host operations
//!
//! One [`Op`] is one step of a node's plan. Each maps to a single remote
//! command or file transfer. Secret material is only ever carried by the
//! file operations and is sent through [`RemoteExecutor::write_file`], never
//! on a command line.

use crate::context::RemoteExecutor;
use crate::error::RemoteError;
use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use crate::observed::TunnelKind;
use crate::topology::Node;
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use zeroize::Zeroizing;

/// Permission bits for every file this mesh writes
pub const FILE_MODE: u32 = 0o600;

/// Desired configuration of one WireGuard peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Peer node name
    pub name: String,
    pub public_key: PublicKey,
    /// `host:port`, brackets around IPv6 literals
    pub endpoint: String,
    /// The peer's transit address as a host route
    pub allowed_ip: IpNet,
    pub keepalive: u16,
    /// Preshared key file on this host
    pub preshared_path: String,
}

/// Type of change, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Modify,
    Remove,
}

impl OpKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Modify => "~",
            Self::Remove => "-",
        }
    }
}

/// A single step of a node's plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Write the node's freshly generated private key
    InstallPrivateKey { path: String, key: PrivateKey },
    /// Write a freshly generated preshared key for the edge toward `peer`
    InstallPresharedKey {
        path: String,
        peer: String,
        key: PresharedKey,
    },
    CreateInterface {
        name: String,
        listen_port: u16,
        address: IpNet,
        key_path: String,
    },
    RemoveInterface { name: String },
    SetListenPort { name: String, port: u16 },
    /// Ensure `address` is assigned, removing `stale` ones
    SetInterfaceAddress {
        name: String,
        address: IpNet,
        stale: Vec<IpNet>,
    },
    AddPeer { interface: String, peer: PeerConfig },
    UpdatePeer { interface: String, peer: PeerConfig },
    RemovePeer {
        interface: String,
        public_key: PublicKey,
    },
    CreateTunnel {
        name: String,
        kind: TunnelKind,
        local: IpAddr,
        remote: IpAddr,
    },
    RemoveTunnel { name: String },
    /// Create a bridge with spanning tree enabled
    CreateBridge { name: String, priority: u16 },
    RemoveBridge { name: String },
    AttachMember { bridge: String, member: String },
    DetachMember { bridge: String, member: String },
    SetBridgeAddress {
        bridge: String,
        address: IpNet,
        stale: Vec<IpNet>,
    },
    SetBridgeStp { bridge: String, priority: u16 },
    LinkUp { name: String },
    LinkDown { name: String },
    /// Write the persisted configuration file
    WriteConfig { path: String, content: String },
    /// Delete persisted files; missing ones are ignored
    DeleteConfig { paths: Vec<String> },
}

fn address_commands(dev: &str, address: &IpNet, stale: &[IpNet]) -> String {
    stale
        .iter()
        .map(|s| format!("ip address del {s} dev {dev}"))
        .chain(std::iter::once(format!(
            "ip address replace {address} dev {dev}"
        )))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn peer_command(interface: &str, peer: &PeerConfig) -> String {
    format!(
        "wg set {interface} peer {} preshared-key {} endpoint {} allowed-ips {} persistent-keepalive {}",
        peer.public_key, peer.preshared_path, peer.endpoint, peer.allowed_ip, peer.keepalive
    )
}

impl Op {
    /// Whether this is a creation, modification or removal
    pub fn kind(&self) -> OpKind {
        match self {
            Self::InstallPrivateKey { .. }
            | Self::InstallPresharedKey { .. }
            | Self::CreateInterface { .. }
            | Self::AddPeer { .. }
            | Self::CreateTunnel { .. }
            | Self::CreateBridge { .. }
            | Self::AttachMember { .. } => OpKind::Create,
            Self::RemoveInterface { .. }
            | Self::RemovePeer { .. }
            | Self::RemoveTunnel { .. }
            | Self::RemoveBridge { .. }
            | Self::DetachMember { .. }
            | Self::LinkDown { .. }
            | Self::DeleteConfig { .. } => OpKind::Remove,
            Self::SetListenPort { .. }
            | Self::SetInterfaceAddress { .. }
            | Self::UpdatePeer { .. }
            | Self::SetBridgeAddress { .. }
            | Self::SetBridgeStp { .. }
            | Self::LinkUp { .. }
            | Self::WriteConfig { .. } => OpKind::Modify,
        }
    }

    /// Human-readable description, also used as the step name in reports
    pub fn describe(&self) -> String {
        match self {
            Self::InstallPrivateKey { path, .. } => format!("install private key {path}"),
            Self::InstallPresharedKey { peer, .. } => format!("install preshared key for {peer}"),
            Self::CreateInterface {
                name, listen_port, ..
            } => format!("create interface {name} (port {listen_port})"),
            Self::RemoveInterface { name } => format!("remove interface {name}"),
            Self::SetListenPort { name, port } => format!("set listen port of {name} to {port}"),
            Self::SetInterfaceAddress { name, address, .. } => {
                format!("set address of {name} to {address}")
            }
            Self::AddPeer { peer, .. } => format!("add peer {} ({})", peer.name, peer.endpoint),
            Self::UpdatePeer { peer, .. } => {
                format!("update peer {} ({})", peer.name, peer.endpoint)
            }
            Self::RemovePeer { public_key, .. } => format!("remove peer {public_key}"),
            Self::CreateTunnel {
                name, kind, remote, ..
            } => format!("create {kind} tunnel {name} to {remote}"),
            Self::RemoveTunnel { name } => format!("remove tunnel {name}"),
            Self::CreateBridge { name, priority } => {
                format!("create bridge {name} (stp priority {priority})")
            }
            Self::RemoveBridge { name } => format!("remove bridge {name}"),
            Self::AttachMember { bridge, member } => format!("attach {member} to {bridge}"),
            Self::DetachMember { bridge, member } => format!("detach {member} from {bridge}"),
            Self::SetBridgeAddress {
                bridge, address, ..
            } => format!("set address of {bridge} to {address}"),
            Self::SetBridgeStp { bridge, priority } => {
                format!("enable stp on {bridge} (priority {priority})")
            }
            Self::LinkUp { name } => format!("bring {name} up"),
            Self::LinkDown { name } => format!("bring {name} down"),
            Self::WriteConfig { path, .. } => format!("write {path}"),
            Self::DeleteConfig { paths } => format!("delete {}", paths.join(", ")),
        }
    }

    /// Shell command for this operation; `None` for file writes
    pub fn command(&self) -> Option<String> {
        let command = match self {
            Self::InstallPrivateKey { .. }
            | Self::InstallPresharedKey { .. }
            | Self::WriteConfig { .. } => return None,
            Self::CreateInterface {
                name,
                listen_port,
                address,
                key_path,
            } => format!(
                "ip link add dev {name} type wireguard && ip address add {address} dev {name} \
                 && wg set {name} listen-port {listen_port} private-key {key_path}"
            ),
            Self::RemoveInterface { name }
            | Self::RemoveTunnel { name }
            | Self::RemoveBridge { name } => format!("ip link del dev {name}"),
            Self::SetListenPort { name, port } => format!("wg set {name} listen-port {port}"),
            Self::SetInterfaceAddress {
                name,
                address,
                stale,
            } => address_commands(name, address, stale),
            Self::AddPeer { interface, peer } | Self::UpdatePeer { interface, peer } => {
                peer_command(interface, peer)
            }
            Self::RemovePeer {
                interface,
                public_key,
            } => format!("wg set {interface} peer {public_key} remove"),
            Self::CreateTunnel {
                name,
                kind,
                local,
                remote,
            } => format!("ip link add dev {name} type {kind} local {local} remote {remote}"),
            Self::CreateBridge { name, priority } => {
                format!("ip link add name {name} type bridge stp_state 1 priority {priority}")
            }
            Self::AttachMember { bridge, member } => {
                format!("ip link set dev {member} master {bridge}")
            }
            Self::DetachMember { member, .. } => format!("ip link set dev {member} nomaster"),
            Self::SetBridgeAddress {
                bridge,
                address,
                stale,
            } => address_commands(bridge, address, stale),
            Self::SetBridgeStp { bridge, priority } => {
                format!("ip link set dev {bridge} type bridge stp_state 1 priority {priority}")
            }
            Self::LinkUp { name } => format!("ip link set dev {name} up"),
            Self::LinkDown { name } => format!("ip link set dev {name} down"),
            Self::DeleteConfig { paths } => format!("rm -f -- {}", paths.join(" ")),
        };
        Some(command)
    }

    /// Private key carried by this operation, if any
    pub fn private_key(&self) -> Option<&PrivateKey> {
        match self {
            Self::InstallPrivateKey { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Preshared key carried by this operation, if any
    pub fn preshared_key(&self) -> Option<&PresharedKey> {
        match self {
            Self::InstallPresharedKey { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whether the operation only touches persisted files
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Self::InstallPrivateKey { .. }
                | Self::InstallPresharedKey { .. }
                | Self::WriteConfig { .. }
                | Self::DeleteConfig { .. }
        )
    }

    /// Run the operation on `node`
    pub fn execute<R: RemoteExecutor + ?Sized>(
        &self,
        remote: &R,
        node: &Node,
    ) -> Result<(), RemoteError> {
        match self {
            Self::InstallPrivateKey { path, key } => {
                let content = secret_file(&key.to_base64());
                remote.write_file(node, path, content.as_bytes(), FILE_MODE)
            }
            Self::InstallPresharedKey { path, key, .. } => {
                let content = secret_file(&key.to_base64());
                remote.write_file(node, path, content.as_bytes(), FILE_MODE)
            }
            Self::WriteConfig { path, content } => {
                remote.write_file(node, path, content.as_bytes(), FILE_MODE)
            }
            other => match other.command() {
                Some(command) => remote.apply(node, &command).map(|_| ()),
                None => Ok(()),
            },
        }
    }
}

fn secret_file(encoded: &str) -> Zeroizing<String> {
    let mut content = Zeroizing::new(String::with_capacity(encoded.len() + 1));
    content.push_str(encoded);
    content.push('\n');
    content
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
