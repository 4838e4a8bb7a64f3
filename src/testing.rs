//! Shared fixtures for tests

use meshcore::{Connect, MeshDecl, NodeDecl, Topology};

/// Full mesh `lab` over fd00::/64 with nodes n0..n{count}
pub fn lab_topology(count: usize) -> Topology {
    let node = |i: usize| NodeDecl {
        name: format!("n{i}"),
        addr: format!("fd00::{}", i + 1),
        connect: Connect::Target(format!("root@n{i}.example")),
        endpoint: format!("198.51.100.{}", i + 1),
        listen_port: None,
        prio: None,
        peers: Vec::new(),
        meta: None,
    };
    Topology::build(&MeshDecl {
        name: "lab".into(),
        network: "fd00::/64".into(),
        full: true,
        transit: None,
        nodes: (0..count).map(node).collect(),
    })
    .unwrap()
}
