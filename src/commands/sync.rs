//! `sync`: converge hosts whose interface is up; on the others only the
//! key, preshared key and configuration files are refreshed.

use anyhow::Result;
use meshcore::Mode;

use super::{load_mesh, run_options};
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let mesh = load_mesh(ctx)?;
    if !ctx.quiet {
        ui::header(&format!("Syncing mesh {}", mesh.topology.name));
    }
    engine::execute(&mesh.topology, &mesh.remote, Mode::Sync, &run_options(ctx, args))
}
