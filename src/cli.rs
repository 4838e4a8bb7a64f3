use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wgmesh")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Bring up WireGuard + GRE bridge meshes across Linux hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Mesh file, or - for stdin
    #[arg(short, long, global = true, env = "WGMESH_FILE", default_value = "mesh.yaml")]
    pub file: PathBuf,

    /// Read the mesh file as JSON regardless of its extension
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Hosts handled in parallel
    #[arg(long, global = true, default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub jobs: u16,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the mesh up on every host
    Up(UpArgs),

    /// Tear the mesh down on every host
    Down(DownArgs),

    /// Converge live hosts, refresh persisted files on the others
    Sync(PlanArgs),

    /// Show what each host has deployed
    Show,

    /// Print a mesh summary
    Info(InfoArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags shared by every command that changes hosts
#[derive(Args, Clone, Copy)]
pub struct PlanArgs {
    /// Show the plan without applying it
    #[arg(long)]
    pub dry_run: bool,

    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct UpArgs {
    /// Take over hosts that carry a deployment this mesh does not own
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Args)]
pub struct DownArgs {
    /// Also delete configuration and key files
    #[arg(short, long)]
    pub remove: bool,

    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Print JSON instead of YAML
    #[arg(short = 'J', long = "json-out")]
    pub json_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_up_with_globals() {
        let cli = Cli::parse_from(["wgmesh", "-f", "lab.json", "-vv", "up", "--force", "-y"]);
        assert_eq!(cli.file, PathBuf::from("lab.json"));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Up(args) => {
                assert!(args.force);
                assert!(args.plan.yes);
                assert!(!args.plan.dry_run);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_parse_down_remove() {
        let cli = Cli::parse_from(["wgmesh", "down", "-r", "--dry-run"]);
        match cli.command {
            Command::Down(args) => {
                assert!(args.remove);
                assert!(args.plan.dry_run);
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_parse_info_json_out() {
        let cli = Cli::parse_from(["wgmesh", "info", "-J"]);
        assert!(matches!(cli.command, Command::Info(InfoArgs { json_out: true })));
        assert_eq!(cli.jobs, 8);
    }

    #[test]
    fn test_jobs_must_be_positive() {
        assert!(Cli::try_parse_from(["wgmesh", "--jobs", "0", "show"]).is_err());
    }
}
