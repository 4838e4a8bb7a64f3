use anyhow::Result;
use meshcore::Mode;

use super::{load_mesh, run_options};
use crate::Context;
use crate::cli::UpArgs;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context, args: UpArgs) -> Result<()> {
    let mesh = load_mesh(ctx)?;
    if !ctx.quiet {
        ui::header(&format!("Bringing up mesh {}", mesh.topology.name));
    }
    engine::execute(
        &mesh.topology,
        &mesh.remote,
        Mode::Up { force: args.force },
        &run_options(ctx, args.plan),
    )
}
