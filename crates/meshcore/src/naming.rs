//! Derived names: kernel links, host file paths, and the default transit prefix.

use ipnet::{IpNet, Ipv6Net};
use std::net::Ipv6Addr;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_LINK_NAME: usize = 15;

/// Directory holding keys and wg-quick configuration on every host.
pub const CONFIG_DIR: &str = "/etc/wireguard";

/// Fit `name` into a kernel link name, hashing it behind `prefix` if too long.
pub fn link_name(prefix: &str, name: &str) -> String {
    if name.len() <= MAX_LINK_NAME {
        return name.to_string();
    }
    let mut short = format!("{prefix}{}", blake3::hash(name.as_bytes()).to_hex());
    short.truncate(MAX_LINK_NAME);
    short
}

/// WireGuard interface of the node at `index`.
pub fn interface_name(mesh: &str, index: usize) -> String {
    link_name("wg-", &format!("wg-{mesh}{index}"))
}

/// Bridge of the node at `index`.
pub fn bridge_name(mesh: &str, index: usize) -> String {
    link_name("br-", &format!("br-{mesh}{index}"))
}

/// Tunnel on node `local` toward node `remote`.
pub fn tunnel_name(mesh: &str, local: usize, remote: usize) -> String {
    link_name("gt-", &format!("gt-{mesh}{local}-{remote}"))
}

pub fn config_path(interface: &str) -> String {
    format!("{CONFIG_DIR}/{interface}.conf")
}

pub fn key_path(interface: &str) -> String {
    format!("{CONFIG_DIR}/{interface}.key")
}

/// Preshared key file for the edge toward `peer`.
pub fn preshared_path(interface: &str, peer: &str) -> String {
    format!("{CONFIG_DIR}/{interface}.{peer}.psk")
}

/// Peer name encoded in a preshared key file name, if it belongs to `interface`.
pub fn preshared_peer<'a>(interface: &str, file_name: &'a str) -> Option<&'a str> {
    file_name
        .strip_prefix(interface)?
        .strip_prefix('.')?
        .strip_suffix(".psk")
        .filter(|peer| !peer.is_empty())
}

/// Deterministic ULA /64 for a mesh's WireGuard transit addresses.
///
/// `fd` followed by 40 bits of `blake3(mesh)`, subnet id zero.
pub fn default_transit(mesh: &str) -> IpNet {
    let hash = blake3::hash(mesh.as_bytes());
    let mut octets = [0u8; 16];
    octets[0] = 0xfd;
    octets[1..6].copy_from_slice(&hash.as_bytes()[..5]);
    IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::from(octets), 64))
}
