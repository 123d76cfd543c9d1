use std::sync::Arc;

use camino::Utf8Path;
use colored::Colorize;
use miette::Result;
use npc_patcher::{AppearanceEngine, CancelToken, EngineConfig, FsContentSource, ScreeningResult};

use crate::{
    commands::{log_progress, print_pass_problems, reason_label},
    errors::CliError,
    println_pad,
    utils::{build_pass_input, load_profile},
};

#[derive(Debug)]
pub struct ScreenSelectionsArgs {
    pub profile: String,
    pub unresolved_only: bool,
}

fn mark(value: bool) -> colored::ColoredString {
    if value {
        "✓".bright_green()
    } else {
        "✗".bright_red()
    }
}

fn print_result(result: &ScreeningResult) {
    let selection = result
        .selection
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let winner = result
        .winning_override
        .as_ref()
        .map(|w| w.package.to_string())
        .unwrap_or_else(|| "-".to_string());

    let line = format!(
        "{} {} override {} assets {} {}",
        result.key.to_string().bright_white().bold(),
        format!("selection={} winner={}", selection, winner).dimmed(),
        mark(result.has_package_override),
        mark(result.has_required_assets),
        match result.reason {
            Some(reason) => reason_label(reason).bright_yellow(),
            None => "valid".bright_green(),
        }
    );
    println_pad!("   {} {}", "•".bright_cyan(), line);
}

/// Run resolution and screening without writing a patch or touching the cache file.
pub fn screen_selections(args: ScreenSelectionsArgs) -> Result<()> {
    let profile = load_profile(Utf8Path::new(&args.profile))?;
    let input = build_pass_input(&profile)?;

    let engine = AppearanceEngine::new(
        Arc::new(FsContentSource::new()),
        EngineConfig::from_profile(&profile),
    )
    .with_progress(log_progress);
    if let Some(path) = profile.cache_path() {
        engine.load_cache(&path).map_err(CliError::from)?;
    }

    let report = engine
        .run_full_pass(&input, &CancelToken::new())
        .map_err(CliError::from)?;

    println!(
        "{} {}",
        "🔎 Screening:".bright_blue().bold(),
        format!(
            "{} character(s), {} valid",
            report.screening.len(),
            report
                .screening
                .iter()
                .filter(|r| r.selection_is_valid)
                .count()
        )
        .bright_white()
    );

    for result in &report.screening {
        if args.unresolved_only && result.selection_is_valid {
            continue;
        }
        print_result(result);
    }

    print_pass_problems(&report);
    Ok(())
}
