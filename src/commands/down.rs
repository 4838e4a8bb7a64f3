use anyhow::Result;
use meshcore::Mode;

use super::{load_mesh, run_options};
use crate::Context;
use crate::cli::DownArgs;
use crate::engine;
use crate::ui;

pub fn run(ctx: &Context, args: DownArgs) -> Result<()> {
    let mesh = load_mesh(ctx)?;
    if !ctx.quiet {
        let action = if args.remove {
            "Removing"
        } else {
            "Bringing down"
        };
        ui::header(&format!("{action} mesh {}", mesh.topology.name));
    }
    engine::execute(
        &mesh.topology,
        &mesh.remote,
        Mode::Down {
            remove: args.remove,
        },
        &run_options(ctx, args.plan),
    )
}
