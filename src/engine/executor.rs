//! Execution engine - probe, plan, confirm, apply, report

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use log::warn;
use meshcore::{CancelToken, ExecuteOptions, Mode, Outcome, RemoteExecutor, RunReport, Topology};

use super::differ::display_plan;
use super::planner;
use crate::progress::NodeProgress;

/// Options for one converging run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Don't make changes, just show the plan
    pub dry_run: bool,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Number of hosts handled in parallel
    pub jobs: usize,
    /// Show configuration diffs and unchanged hosts
    pub verbose: bool,
    /// Hide progress bars
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            yes: false,
            jobs: 8,
            verbose: false,
            quiet: false,
        }
    }
}

/// Command line that repeats `mode`
pub fn rerun_command(mode: Mode) -> &'static str {
    match mode {
        Mode::Up { force: false } => "wgmesh up",
        Mode::Up { force: true } => "wgmesh up --force",
        Mode::Sync => "wgmesh sync",
        Mode::Down { remove: false } => "wgmesh down",
        Mode::Down { remove: true } => "wgmesh down -r",
    }
}

/// Converge the mesh towards `mode`
///
/// Fails when any host did not succeed, after printing the per-host
/// breakdown.
pub fn execute<R>(topology: &Topology, remote: &R, mode: Mode, opts: &RunOptions) -> Result<()>
where
    R: RemoteExecutor + ?Sized,
{
    let observed = planner::probe(topology, remote, opts.jobs, opts.quiet)?;
    let plan = planner::plan(topology, &observed, mode);

    display_plan(topology, &plan, &observed, opts.verbose);

    if opts.dry_run {
        println!();
        crate::ui::info("Dry run - no changes made");
        return Ok(());
    }

    if plan.total_ops() > 0 && !opts.yes && !confirm_proceed()? {
        println!();
        crate::ui::warn("Aborted, nothing was changed");
        return Ok(());
    }

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel);

    let progress = NodeProgress::new(plan.plans.len(), "apply", opts.quiet);
    let report = meshcore::apply(
        topology,
        plan,
        remote,
        &ExecuteOptions { jobs: opts.jobs },
        &progress,
        &cancel,
    )
    .context("Failed to apply plan")?;
    progress.finish();

    print_report(&report, mode);

    let failed = report.failures().count();
    if failed > 0 {
        bail!(
            "{failed} of {} hosts did not converge; fix the problems above and re-run `{}`",
            report.outcomes.len(),
            rerun_command(mode)
        );
    }
    Ok(())
}

/// Cancel remaining operations on the first Ctrl-C
fn install_interrupt_handler(cancel: &CancelToken) {
    let handler = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if !handler.is_cancelled() {
            eprintln!(
                "\n  {} Interrupted - finishing operations in flight",
                "⚠".yellow()
            );
        }
        handler.cancel();
    });
    if let Err(e) = installed {
        warn!("could not install interrupt handler: {e}");
    }
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    if !console::user_attended() {
        bail!("Not running in a terminal; pass -y to apply without confirmation");
    }

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()
        .context("Confirmation failed")?;

    Ok(confirmed)
}

/// One report line per host
pub fn outcome_line(node: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Succeeded { applied: 0 } => {
            format!("{} {node} {}", "○".dimmed(), "up to date".dimmed())
        }
        Outcome::Succeeded { applied } => {
            format!("{} {node} {}", "✓".green(), crate::ui::count(*applied, "change"))
        }
        Outcome::Failed { step, cause } => {
            format!("{} {node} failed at '{step}': {cause}", "✗".red())
        }
        Outcome::SkippedUnreachable { reason } => {
            format!("{} {node} unreachable: {reason}", "⚠".yellow())
        }
        Outcome::Conflict { reason } => format!("{} {node} conflict: {reason}", "✗".red()),
    }
}

/// Print final summary
fn print_report(report: &RunReport, mode: Mode) {
    println!();
    if report.is_success() {
        println!(
            "  {} Mesh {} complete: {} applied",
            "✓".green().bold(),
            mode.verb(),
            crate::ui::count(report.total_applied(), "change")
        );
    } else {
        println!(
            "  {} Mesh {} finished with errors",
            "⚠".yellow().bold(),
            mode.verb()
        );
    }

    for (node, outcome) in &report.outcomes {
        println!("    {}", outcome_line(node, outcome));
    }

    let conflicts = report
        .outcomes
        .values()
        .any(|o| matches!(o, Outcome::Conflict { .. }));
    if conflicts {
        println!();
        crate::ui::dim("Hosts with a conflict carry a deployment this mesh does not own.");
        crate::ui::dim("Run `wgmesh up --force` to take them over.");
    }
}
