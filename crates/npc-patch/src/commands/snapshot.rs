use camino::Utf8Path;
use colored::Colorize;
use miette::Result;
use npc_patcher::{compute_snapshot, CancelToken, SnapshotCache};

use crate::{
    errors::CliError,
    println_pad,
    utils::{build_pass_input, load_profile},
};

#[derive(Debug)]
pub struct SnapshotPackagesArgs {
    pub profile: String,
}

/// Scan every installed package and compare it with the persisted cache.
pub fn snapshot_packages(args: SnapshotPackagesArgs) -> Result<()> {
    let profile = load_profile(Utf8Path::new(&args.profile))?;
    let input = build_pass_input(&profile)?;

    let cache = match profile.cache_path() {
        Some(path) => SnapshotCache::load(&path).map_err(CliError::from)?,
        None => SnapshotCache::new(),
    };

    println!(
        "{} {}",
        "📸 Package snapshots:".bright_blue().bold(),
        profile.packages_dir().as_str().bright_cyan()
    );

    let cancel = CancelToken::new();
    for package in &input.packages {
        let snapshot = compute_snapshot(package, &cancel).map_err(CliError::from)?;
        let status = match cache.get(package.id()) {
            None => "new".bright_yellow(),
            Some(entry) if entry.reusable_for(&snapshot) => "unchanged".bright_green(),
            Some(_) => "changed".bright_red(),
        };
        let active = input.load_order.contains(package.id());

        println_pad!(
            "\n{} {} {} {}",
            "•".bright_cyan(),
            package.id().to_string().bright_white().bold(),
            format!("({})", package.name()).dimmed(),
            status
        );
        println_pad!(
            "     layers={} plugins={} archives={} dirs={} active={}",
            package.layers().len(),
            snapshot.plugins.len(),
            snapshot.archives.len(),
            snapshot.directories.len(),
            active
        );
        println_pad!("     fingerprint={:016x}", snapshot.fingerprint());
        if !snapshot.missing_layers.is_empty() {
            println_pad!(
                "     {} {:?}",
                "missing layers:".bright_red(),
                snapshot.missing_layers
            );
        }
    }

    Ok(())
}
