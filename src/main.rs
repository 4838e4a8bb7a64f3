mod cli;
mod commands;
mod config;
mod engine;
mod progress;
mod remote;
mod ui;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Mesh file as given on the command line
    pub file: PathBuf,
    /// Parse the mesh file as JSON
    pub json: bool,
    /// Hosts handled in parallel
    pub jobs: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        json: cli.json,
        jobs: usize::from(cli.jobs),
    };

    match cli.command {
        Command::Up(args) => commands::up::run(&ctx, args),
        Command::Down(args) => commands::down::run(&ctx, args),
        Command::Sync(args) => commands::sync::run(&ctx, args),
        Command::Show => commands::show::run(&ctx),
        Command::Info(args) => commands::info::run(&ctx, args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "wgmesh", &mut io::stdout());
            Ok(())
        }
    }
}
