//! Plan display

use colored::Colorize;
use meshcore::{MeshPlan, ObservedMesh, Op, OpKind, Topology};
use similar::{ChangeTag, TextDiff};

/// Number of operations by kind: (create, modify, remove)
pub fn tally(plan: &MeshPlan) -> (usize, usize, usize) {
    plan.plans
        .iter()
        .flat_map(|p| &p.ops)
        .fold((0, 0, 0), |(c, m, r), op| match op.kind() {
            OpKind::Create => (c + 1, m, r),
            OpKind::Modify => (c, m + 1, r),
            OpKind::Remove => (c, m, r + 1),
        })
}

/// Changed lines between the stored and the new configuration file
pub fn config_changes(old: &str, new: &str) -> Vec<(ChangeTag, String)> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| (change.tag(), change.value().trim_end().to_string()))
        .collect()
}

fn symbol(kind: OpKind) -> colored::ColoredString {
    match kind {
        OpKind::Create => kind.symbol().green(),
        OpKind::Modify => kind.symbol().yellow(),
        OpKind::Remove => kind.symbol().red(),
    }
}

fn print_config_diff(old: Option<&str>, new: &str) {
    let Some(old) = old else {
        return;
    };
    for (tag, line) in config_changes(old, new) {
        match tag {
            ChangeTag::Delete => println!("│       {}", format!("- {line}").red()),
            ChangeTag::Insert => println!("│       {}", format!("+ {line}").green()),
            ChangeTag::Equal => {}
        }
    }
}

/// Display a mesh plan, grouped by host
///
/// With `verbose`, configuration rewrites show their line diff and hosts
/// without changes are listed too.
pub fn display_plan(topology: &Topology, plan: &MeshPlan, observed: &ObservedMesh, verbose: bool) {
    if plan.is_empty() && plan.unreachable.is_empty() && plan.conflicts.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        format!("Plan: {} {}", plan.mode.verb(), topology.name).bold()
    );
    println!("│");

    for node_plan in &plan.plans {
        let host = topology
            .node(&node_plan.node)
            .map(|n| n.connect.host().to_string())
            .unwrap_or_default();

        if node_plan.is_empty() {
            if verbose {
                println!("│ {} {} {}", "○".dimmed(), node_plan.node, "up to date".dimmed());
            }
            continue;
        }

        println!("│ {} {}", node_plan.node.bold(), format!("({host})").dimmed());
        for op in &node_plan.ops {
            println!("│   {} {}", symbol(op.kind()), op.describe());
            if verbose && let Op::WriteConfig { content, .. } = op {
                let stored = observed
                    .get(&node_plan.node)
                    .and_then(|p| p.observed())
                    .and_then(|s| s.files.config.as_deref());
                print_config_diff(stored, content);
            }
        }
        println!("│");
    }

    for (node, reason) in &plan.unreachable {
        println!(
            "│ {} {} {}",
            "⚠".yellow(),
            node.bold(),
            format!("unreachable, skipped: {reason}").yellow()
        );
    }
    for (node, reason) in &plan.conflicts {
        println!(
            "│ {} {} {}",
            "✗".red(),
            node.bold(),
            format!("conflict, skipped: {reason}").red()
        );
    }
    if !plan.unreachable.is_empty() || !plan.conflicts.is_empty() {
        println!("│");
    }

    let (created, modified, removed) = tally(plan);
    let hosts = plan.plans.iter().filter(|p| !p.is_empty()).count();

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} on {} ({} create, {} modify, {} remove)",
        crate::ui::count(plan.total_ops(), "change").bold(),
        crate::ui::count(hosts, "host"),
        created.to_string().green(),
        modified.to_string().yellow(),
        removed.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
