mod build;
mod screen;
mod snapshot;

pub use build::*;
pub use screen::*;
pub use snapshot::*;

use crate::println_pad;
use colored::Colorize;
use npc_patcher::{PassProgress, PassReport, UnresolvedReason};

pub(crate) fn log_progress(progress: PassProgress) {
    tracing::debug!(
        "pass {} stage={:?} {}/{}",
        progress.generation,
        progress.stage,
        progress.current,
        progress.total
    );
}

pub(crate) fn reason_label(reason: UnresolvedReason) -> &'static str {
    match reason {
        UnresolvedReason::NoSelection => "no package selected",
        UnresolvedReason::UnknownPackage => "selected package is not installed",
        UnresolvedReason::NoOverrideOrAssets => "selected package has no record or FaceGen assets",
    }
}

/// Print unresolved characters, dependent conflicts and degraded packages.
pub(crate) fn print_pass_problems(report: &PassReport) {
    if !report.output.unresolved.is_empty() {
        println_pad!(
            "\n{} {}",
            "⚠️  Unresolved characters:".bright_yellow().bold(),
            report.output.unresolved.len().to_string().bright_white()
        );
        for unresolved in &report.output.unresolved {
            let selection = unresolved
                .selection
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println_pad!(
                "   {} {} {} {}",
                "•".bright_cyan(),
                unresolved.key.to_string().bright_white().bold(),
                format!("(selection: {})", selection).dimmed(),
                reason_label(unresolved.reason).bright_yellow()
            );
        }
    }

    if !report.forwarding.conflicts.is_empty() {
        println_pad!(
            "\n{}",
            "🔀 Conflicting dependent-record edits:".bright_magenta().bold()
        );
        for conflict in &report.forwarding.conflicts {
            println_pad!(
                "   {} {} '{}' from {} character(s), resolved by {:?} to {}",
                "•".bright_cyan(),
                conflict.dependent.to_string().bright_white().bold(),
                conflict.property,
                conflict.contributions.len(),
                conflict.tie_break,
                conflict
                    .resolved
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<removed>".to_string())
            );
        }
    }

    if !report.degraded_packages.is_empty() {
        println_pad!(
            "\n{}",
            "🩹 Degraded packages (some layers contributed nothing):"
                .bright_red()
                .bold()
        );
        for package in &report.degraded_packages {
            println_pad!("   {} {}", "•".bright_cyan(), package.to_string().bright_white());
        }
    }
}
