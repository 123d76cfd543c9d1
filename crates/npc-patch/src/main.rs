use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    build_patch, screen_selections, snapshot_packages, BuildPatchArgs, ScreenSelectionsArgs,
    SnapshotPackagesArgs,
};
use miette::{IntoDiagnostic, Result};

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full resolution pass and write the patch
    Build {
        /// The path to the profile file
        #[arg(short, long, default_value = "profile.toml")]
        profile: String,

        /// Write the patch here instead of the profile's output path
        #[arg(short, long)]
        output: Option<String>,

        /// Ignore and don't update the snapshot cache
        #[arg(long)]
        no_cache: bool,

        /// Also write the full pass report as JSON
        #[arg(long)]
        report: Option<String>,
    },
    /// Show package snapshots and whether they changed since the cached pass
    Snapshot {
        /// The path to the profile file
        #[arg(short, long, default_value = "profile.toml")]
        profile: String,
    },
    /// Screen every selection without writing a patch
    Screen {
        /// The path to the profile file
        #[arg(short, long, default_value = "profile.toml")]
        profile: String,

        /// Only list characters that could not be resolved
        #[arg(long)]
        unresolved_only: bool,
    },
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

fn main() -> Result<()> {
    let args = parse_args()?;
    utils::init_logging(args.verbose);

    match args.command {
        Commands::Build {
            profile,
            output,
            no_cache,
            report,
        } => build_patch(BuildPatchArgs {
            profile,
            output,
            no_cache,
            report,
        }),
        Commands::Snapshot { profile } => snapshot_packages(SnapshotPackagesArgs { profile }),
        Commands::Screen {
            profile,
            unresolved_only,
        } => screen_selections(ScreenSelectionsArgs {
            profile,
            unresolved_only,
        }),
    }
}
