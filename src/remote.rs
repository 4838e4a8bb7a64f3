//! SSH transport for the mesh engine

use anyhow::{Context, Result};
use meshcore::{CommandOutput, Connect, Node, RemoteError, RemoteExecutor, Topology};
use sshkit::{Session, Target};
use std::collections::HashMap;

/// Resolve a node's connection descriptor into an SSH target
pub fn target_for(connect: &Connect) -> Result<Target> {
    match connect {
        Connect::Target(value) => {
            Target::parse(value).with_context(|| format!("Invalid ssh target '{value}'"))
        }
        Connect::Options {
            host,
            user,
            port,
            identity_file,
        } => {
            let mut target = Target::new(host.clone());
            target.user = user.clone();
            target.port = *port;
            if let Some(path) = identity_file {
                target = target.with_identity_file(shellexpand::tilde(path).into_owned());
            }
            Ok(target)
        }
    }
}

fn remote_error(err: sshkit::Error) -> RemoteError {
    match err {
        sshkit::Error::CommandFailed { status, stderr } => {
            RemoteError::CommandFailed { status, stderr }
        }
        sshkit::Error::Io(e) => RemoteError::Io(e),
        other => {
            let category = other.category();
            let message = if category.is_unreachable() {
                format!("{other} ({})", category.advice())
            } else {
                other.to_string()
            };
            RemoteError::Unreachable { message }
        }
    }
}

/// [`RemoteExecutor`] over an [`sshkit::Session`]
pub struct SshExecutor {
    session: Session,
    targets: HashMap<String, Target>,
}

impl SshExecutor {
    /// Resolve every node's target up front so bad descriptors fail early
    pub fn new(session: Session, topology: &Topology) -> Result<Self> {
        let targets = topology
            .nodes()
            .iter()
            .map(|node| {
                target_for(&node.connect)
                    .with_context(|| format!("Node '{}'", node.name))
                    .map(|target| (node.name.clone(), target))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { session, targets })
    }

    /// Target used for `node`
    pub fn target(&self, node: &str) -> Option<&Target> {
        self.targets.get(node)
    }

    fn resolve(&self, node: &Node) -> Result<&Target, RemoteError> {
        self.targets
            .get(&node.name)
            .ok_or_else(|| RemoteError::Unreachable {
                message: format!("no ssh target for node '{}'", node.name),
            })
    }
}

impl RemoteExecutor for SshExecutor {
    fn run(&self, node: &Node, command: &str) -> Result<CommandOutput, RemoteError> {
        let target = self.resolve(node)?;
        let output = self.session.run(target, command).map_err(remote_error)?;
        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn write_file(
        &self,
        node: &Node,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<(), RemoteError> {
        let target = self.resolve(node)?;
        self.session
            .write_file(target, path, content, mode)
            .map_err(remote_error)
    }

    fn read_file(&self, node: &Node, path: &str) -> Result<Option<String>, RemoteError> {
        let target = self.resolve(node)?;
        self.session.read_file(target, path).map_err(remote_error)
    }

    fn apply(&self, node: &Node, command: &str) -> Result<String, RemoteError> {
        let target = self.resolve(node)?;
        self.session.run_once(target, command).map_err(remote_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_string() {
        let target = target_for(&Connect::Target("ops@a.example:2222".into())).unwrap();
        assert_eq!(target.user.as_deref(), Some("ops"));
        assert_eq!(target.port, Some(2222));
    }

    #[test]
    fn test_target_from_options() {
        let target = target_for(&Connect::Options {
            host: "b.example".into(),
            user: Some("root".into()),
            port: None,
            identity_file: Some("/keys/mesh".into()),
        })
        .unwrap();
        assert!(target.is_root());
        assert_eq!(target.identity_file.as_deref(), Some(std::path::Path::new("/keys/mesh")));
    }

    #[test]
    fn test_invalid_target() {
        assert!(target_for(&Connect::Target("a:notaport".into())).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let failed = remote_error(sshkit::Error::CommandFailed {
            status: 2,
            stderr: "RTNETLINK answers: File exists".into(),
        });
        assert!(matches!(failed, RemoteError::CommandFailed { status: 2, .. }));

        let refused = remote_error(sshkit::Error::Connection {
            host: "a".into(),
            message: "Connection refused".into(),
        });
        assert!(refused.is_unreachable());
        assert!(refused.to_string().contains("accepts SSH connections"));

        let denied = remote_error(sshkit::Error::Permission {
            host: "a".into(),
            message: "sudo: a password is required".into(),
        });
        assert!(denied.is_unreachable());
    }

    /// Backend whose connection always drops
    #[derive(Clone, Default)]
    struct Dropping(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl sshkit::backend::Backend for Dropping {
        fn is_available(&self) -> bool {
            true
        }

        fn execute(
            &self,
            target: &Target,
            _command: &str,
            _stdin: Option<&[u8]>,
        ) -> sshkit::Result<sshkit::Output> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(sshkit::Error::Connection {
                host: target.host.clone(),
                message: "Connection to host closed by remote host.".into(),
            })
        }
    }

    #[test]
    fn test_plan_commands_are_not_retried() {
        let topology = crate::testing::lab_topology(2);
        let backend = Dropping::default();
        let session = Session::with_backend(Box::new(backend.clone())).with_retry(
            sshkit::RetryConfig {
                max_attempts: 3,
                base_delay: std::time::Duration::from_millis(1),
                backoff_factor: 1.0,
                max_delay: std::time::Duration::from_millis(2),
            },
        );
        let remote = SshExecutor::new(session, &topology).unwrap();
        let node = &topology.nodes()[0];
        let calls = || backend.0.load(std::sync::atomic::Ordering::SeqCst);

        let err = remote.apply(node, "ip link add dev br-lab0 type bridge").unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(calls(), 1);

        assert!(remote.read_file(node, "/etc/wireguard/wg-lab0.conf").is_err());
        assert_eq!(calls(), 4);
    }
}

