use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use colored::Colorize;
use miette::{IntoDiagnostic, Result, WrapErr};
use npc_patcher::{AppearanceEngine, CancelToken, EngineConfig, FsContentSource};

use crate::{
    commands::{log_progress, print_pass_problems},
    errors::CliError,
    println_pad,
    utils::{build_pass_input, load_profile},
};

#[derive(Debug)]
pub struct BuildPatchArgs {
    pub profile: String,
    pub output: Option<String>,
    pub no_cache: bool,
    pub report: Option<String>,
}

pub fn build_patch(args: BuildPatchArgs) -> Result<()> {
    let profile = load_profile(Utf8Path::new(&args.profile))?;
    let input = build_pass_input(&profile)?;
    let config = EngineConfig::from_profile(&profile);

    println!(
        "{} {}",
        "🧬 Building NPC appearance patch:".bright_blue().bold(),
        args.profile.bright_cyan().bold()
    );
    println_pad!(
        "{} {} installed, {} active, {} selection(s)",
        "📦 Packages:".bright_green(),
        input.packages.len(),
        input.load_order.len(),
        input.selections.len()
    );
    println_pad!(
        "{} {:?}, {:?}, {:?}",
        "⚙️  Policies:".bright_green(),
        config.forwarding,
        config.dependent_instances,
        config.tie_break
    );

    let engine = AppearanceEngine::new(Arc::new(FsContentSource::new()), config)
        .with_progress(log_progress);

    let cache_path = if args.no_cache {
        None
    } else {
        profile.cache_path()
    };
    if let Some(path) = &cache_path {
        engine.load_cache(path).map_err(CliError::from)?;
    }

    let report = engine
        .run_full_pass(&input, &CancelToken::new())
        .map_err(CliError::from)?;

    let output = args
        .output
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| profile.output_path());
    report
        .output
        .artifact
        .save(&output)
        .map_err(CliError::from)
        .wrap_err(format!("Failed to write patch to {}", output))?;

    if let Some(path) = &cache_path {
        engine.save_cache(path).map_err(CliError::from)?;
    }

    if let Some(report_path) = &args.report {
        let contents = serde_json::to_string_pretty(report.as_ref()).into_diagnostic()?;
        std::fs::write(report_path, contents)
            .into_diagnostic()
            .wrap_err(format!("Failed to write report to {}", report_path))?;
    }

    print_pass_problems(&report);

    println!(
        "\n{} {}",
        "✅ Patch written:".bright_green().bold(),
        output.as_str().bright_cyan()
    );
    println_pad!(
        "{} character(s) patched, {} with forwarded race edits, {} unresolved in {:.2?}",
        report.output.artifact.entries.len().to_string().bright_white().bold(),
        report.forwarding.diffs.len(),
        report.output.unresolved.len(),
        report.elapsed
    );
    if !report.reused_indexes.is_empty() {
        println_pad!(
            "{}",
            format!("{} package index(es) reused from cache", report.reused_indexes.len()).dimmed()
        );
    }

    Ok(())
}
