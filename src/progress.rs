//! Progress indicators for the probe and apply phases.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use meshcore::{Outcome, ProgressCallback};

/// Per-node progress bar
///
/// Advances once per finished node and shows the operation currently
/// running. Failures are printed above the bar so they stay visible.
pub struct NodeProgress {
    bar: ProgressBar,
}

impl NodeProgress {
    pub fn new(nodes: usize, label: &str, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(nodes as u64)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_prefix(label.to_string());
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for NodeProgress {
    fn on_node_start(&self, node: &str, _ops: usize) {
        self.bar.set_message(node.to_string());
    }

    fn on_op_start(&self, node: &str, description: &str) {
        self.bar.set_message(format!("{node}: {description}"));
    }

    fn on_node_complete(&self, node: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded { .. } => {}
            Outcome::Failed { step, cause } => self
                .bar
                .println(format!("  {} {node}: {step}: {cause}", "✗".red())),
            Outcome::SkippedUnreachable { reason } => self
                .bar
                .println(format!("  {} {node}: {reason}", "⚠".yellow())),
            Outcome::Conflict { reason } => self
                .bar
                .println(format!("  {} {node}: {reason}", "✗".red())),
        }
        self.bar.inc(1);
    }
}
