//! Command implementations

pub mod down;
pub mod info;
pub mod show;
pub mod sync;
pub mod up;

use anyhow::{Context as AnyhowContext, Result, bail};
use log::debug;
use meshcore::Topology;
use sshkit::Session;

use crate::Context;
use crate::cli::PlanArgs;
use crate::config;
use crate::engine::RunOptions;
use crate::remote::SshExecutor;

/// A validated mesh and the transport that reaches its hosts
pub struct Mesh {
    pub topology: Topology,
    pub remote: SshExecutor,
}

/// Load, validate and connect the mesh named by the global flags
pub fn load_mesh(ctx: &Context) -> Result<Mesh> {
    let decl = config::load(&ctx.file, ctx.json)?;
    let topology = Topology::build(&decl).context("Invalid mesh")?;
    debug!(
        "mesh {}: {} nodes, {} edges ({:?})",
        topology.name,
        topology.nodes().len(),
        topology.edges().len(),
        topology.mode
    );

    let session = Session::new();
    if !session.is_available() {
        bail!("The OpenSSH client (`ssh`) was not found in PATH");
    }
    let remote = SshExecutor::new(session, &topology)?;
    Ok(Mesh { topology, remote })
}

/// Run options from global flags and per-command plan flags
pub fn run_options(ctx: &Context, args: PlanArgs) -> RunOptions {
    RunOptions {
        dry_run: args.dry_run,
        yes: args.yes,
        jobs: ctx.jobs,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    }
}
