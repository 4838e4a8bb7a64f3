//! Mesh file loading
//!
//! The mesh file is YAML by default. `.json` and `.toml` files are read in
//! their own format, and `-j` forces JSON. Nodes may be given as a map keyed
//! by node name or as a list of entries carrying a `name`; either way the
//! order in the file is the declaration order.

use anyhow::{Context, Result, bail};
use meshcore::{Connect, MeshDecl, NodeDecl};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Default mesh file name, looked up in the working directory first.
pub const DEFAULT_FILE: &str = "mesh.yaml";

/// Mesh file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from `-j` or the file extension.
    pub fn detect(path: &Path, force_json: bool) -> Self {
        if force_json {
            return Self::Json;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    fn parse(self, content: &str) -> Result<MeshFile> {
        let parsed = match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(anyhow::Error::from),
            Self::Json => serde_json::from_str(content).map_err(anyhow::Error::from),
            Self::Toml => toml::from_str(content).map_err(anyhow::Error::from),
        };
        parsed.with_context(|| format!("Invalid {} mesh file", self.extension().to_uppercase()))
    }
}

/// Mesh file as written by the user
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshFile {
    pub name: String,
    pub network: String,
    #[serde(default = "default_full")]
    pub full: bool,
    #[serde(default)]
    pub transit: Option<String>,
    pub nodes: NodeList,
}

fn default_full() -> bool {
    true
}

/// One node entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeEntry {
    /// Required in list form; taken from the key in map form
    #[serde(default)]
    pub name: Option<String>,
    pub addr: String,
    pub ssh: Connect,
    pub endpoint: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub prio: Option<i32>,
    #[serde(default)]
    pub peers: Vec<String>,
    /// Metadata shown to peers
    #[serde(default)]
    pub json: Option<serde_json::Value>,
}

/// Nodes in file order
#[derive(Debug, Default)]
pub struct NodeList(pub Vec<NodeEntry>);

impl<'de> Deserialize<'de> for NodeList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeListVisitor)
    }
}

struct NodeListVisitor;

impl<'de> Visitor<'de> for NodeListVisitor {
    type Value = NodeList;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of node name to node, or a list of nodes with `name`")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut nodes = Vec::new();
        while let Some((key, mut entry)) = map.next_entry::<String, NodeEntry>()? {
            match &entry.name {
                Some(name) if *name != key => {
                    return Err(de::Error::custom(format!(
                        "node '{key}' declares a different name '{name}'"
                    )));
                }
                _ => entry.name = Some(key),
            }
            nodes.push(entry);
        }
        Ok(NodeList(nodes))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut nodes = Vec::new();
        while let Some(entry) = seq.next_element::<NodeEntry>()? {
            if entry.name.is_none() {
                return Err(de::Error::missing_field("name"));
            }
            nodes.push(entry);
        }
        Ok(NodeList(nodes))
    }
}

impl MeshFile {
    /// Convert to the engine's declaration
    pub fn into_decl(self) -> MeshDecl {
        MeshDecl {
            name: self.name,
            network: self.network,
            full: self.full,
            transit: self.transit,
            nodes: self
                .nodes
                .0
                .into_iter()
                .map(|entry| NodeDecl {
                    name: entry.name.unwrap_or_default(),
                    addr: entry.addr,
                    connect: entry.ssh,
                    endpoint: entry.endpoint,
                    listen_port: entry.listen_port,
                    prio: entry.prio,
                    peers: entry.peers,
                    meta: entry.json,
                })
                .collect(),
        }
    }
}

/// Per-user fallback location for the default mesh file
pub fn user_mesh_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wgmesh").join(DEFAULT_FILE))
}

/// Resolve which file to read.
///
/// The default name falls back to the per-user configuration directory
/// when it does not exist in the working directory. Explicit paths are
/// used as given.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path == Path::new(DEFAULT_FILE) && !path.exists() {
        if let Some(fallback) = user_mesh_file().filter(|p| p.exists()) {
            return fallback;
        }
    }
    path.to_path_buf()
}

/// Parse mesh file content
pub fn parse(content: &str, format: ConfigFormat) -> Result<MeshDecl> {
    Ok(format.parse(content)?.into_decl())
}

/// Load the mesh declaration from `path` (`-` reads stdin)
pub fn load(path: &Path, force_json: bool) -> Result<MeshDecl> {
    if path == Path::new("-") {
        let mut content = String::new();
        io::stdin()
            .read_to_string(&mut content)
            .context("Could not read mesh file from stdin")?;
        let format = if force_json {
            ConfigFormat::Json
        } else {
            ConfigFormat::Yaml
        };
        return parse(&content, format).context("Invalid mesh file on stdin");
    }

    let path = resolve_path(path);
    if !path.exists() {
        bail!(
            "Mesh file not found: {} (use -f to point at one)",
            path.display()
        );
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    parse(&content, ConfigFormat::detect(&path, force_json))
        .with_context(|| format!("Invalid mesh file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn temp_file(suffix: &str) -> NamedTempFile {
        Builder::new().suffix(suffix).tempfile().unwrap()
    }

    const YAML_MAP: &str = r"
name: lab
network: fd00::/64
nodes:
  alpha:
    addr: fd00::1/64
    ssh: root@alpha.example
    endpoint: 198.51.100.1
    prio: -8
    json: {site: ams}
  beta:
    addr: fd00::2
    ssh: {host: beta.example, user: ops, port: 2222}
    endpoint: '[2001:db8::2]:51821'
";

    #[test]
    fn test_detect_format() {
        assert_eq!(ConfigFormat::detect(Path::new("mesh.yaml"), false), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect(Path::new("mesh.yml"), false), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect(Path::new("mesh.json"), false), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect(Path::new("mesh.toml"), false), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::detect(Path::new("mesh.yaml"), true), ConfigFormat::Json);
    }

    #[test]
    fn test_parse_yaml_map_keeps_order() {
        let decl = parse(YAML_MAP, ConfigFormat::Yaml).unwrap();
        assert_eq!(decl.name, "lab");
        assert!(decl.full);
        let names: Vec<_> = decl.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta"]);
        assert_eq!(decl.nodes[0].prio, Some(-8));
        assert_eq!(decl.nodes[0].meta, Some(serde_json::json!({"site": "ams"})));
        assert_eq!(
            decl.nodes[1].connect,
            Connect::Options {
                host: "beta.example".into(),
                user: Some("ops".into()),
                port: Some(2222),
                identity_file: None,
            }
        );
    }

    #[test]
    fn test_parse_json_list() {
        let json = r#"{
            "name": "lab",
            "network": "10.10.0.0/24",
            "full": false,
            "nodes": [
                {"name": "b", "addr": "10.10.0.2", "ssh": "b", "endpoint": "b.example", "peers": ["a"]},
                {"name": "a", "addr": "10.10.0.1", "ssh": "a", "endpoint": "a.example:51000"}
            ]
        }"#;
        let decl = parse(json, ConfigFormat::Json).unwrap();
        assert!(!decl.full);
        assert_eq!(decl.nodes[0].name, "b");
        assert_eq!(decl.nodes[0].peers, ["a"]);
        assert_eq!(decl.nodes[1].connect, Connect::Target("a".into()));
    }

    #[test]
    fn test_parse_json_map_keeps_order() {
        let json = r#"{"name": "lab", "network": "fd00::/64", "nodes": {
            "zulu": {"addr": "fd00::1", "ssh": "z", "endpoint": "z"},
            "alpha": {"addr": "fd00::2", "ssh": "a", "endpoint": "a"}
        }}"#;
        let decl = parse(json, ConfigFormat::Json).unwrap();
        let names: Vec<_> = decl.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["zulu", "alpha"]);
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
name = "lab"
network = "fd00::/64"
transit = "fd42:1::/64"

[[nodes]]
name = "a"
addr = "fd00::1"
ssh = "root@a"
endpoint = "a.example"
listen_port = 51900
"#;
        let decl = parse(content, ConfigFormat::Toml).unwrap();
        assert_eq!(decl.transit.as_deref(), Some("fd42:1::/64"));
        assert_eq!(decl.nodes[0].listen_port, Some(51900));
    }

    #[test]
    fn test_list_entry_requires_name() {
        let yaml = "name: lab\nnetwork: fd00::/64\nnodes:\n  - {addr: fd00::1, ssh: a, endpoint: a}\n";
        let err = parse(yaml, ConfigFormat::Yaml).unwrap_err();
        assert!(format!("{err:#}").contains("name"));
    }

    #[test]
    fn test_map_entry_name_mismatch() {
        let yaml = "name: lab\nnetwork: fd00::/64\nnodes:\n  a: {name: b, addr: fd00::1, ssh: a, endpoint: a}\n";
        let err = parse(yaml, ConfigFormat::Yaml).unwrap_err();
        assert!(format!("{err:#}").contains("different name"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "name: lab\nnetwork: fd00::/64\nfull_mesh: true\nnodes: []\n";
        assert!(parse(yaml, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = temp_file(".yaml");
        file.write_all(YAML_MAP.as_bytes()).unwrap();

        let decl = load(file.path(), false).unwrap();
        assert_eq!(decl.nodes.len(), 2);
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let mut file = temp_file(".json");
        file.write_all(b"{not json").unwrap();

        let err = load(file.path(), false).unwrap_err();
        assert!(format!("{err:#}").contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/lab.yaml"), false).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
