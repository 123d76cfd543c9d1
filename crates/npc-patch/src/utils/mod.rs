use crate::errors::CliError;
use camino::Utf8Path;
use miette::Result;
use npc_package::Profile;
use npc_patcher::{discover_packages, FormKey, PackageId, PassInput, Selections};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "npc_patch=debug,npc_patcher=debug"
    } else {
        "npc_patch=info,npc_patcher=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub fn load_profile(path: &Utf8Path) -> Result<Profile> {
    if !path.as_std_path().is_file() {
        return Err(CliError::profile_not_found(path.to_path_buf()).into());
    }
    Profile::load(path).map_err(|source| {
        CliError::ProfileParseError {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

pub fn parse_selections(profile: &Profile) -> Result<Selections> {
    let mut selections = Selections::new();
    for (key, package) in &profile.selections {
        let form_key: FormKey = key
            .parse()
            .map_err(|source| CliError::invalid_selection_key(key.clone(), source))?;
        selections.insert(form_key, PackageId::from(package.as_str()));
    }
    Ok(selections)
}

/// Discover the profile's packages and build the immutable pass input.
pub fn build_pass_input(profile: &Profile) -> Result<PassInput> {
    let packages_dir = profile.packages_dir();
    if !packages_dir.as_std_path().is_dir() {
        return Err(CliError::PackagesDirMissing { path: packages_dir }.into());
    }

    let packages = discover_packages(&packages_dir).map_err(CliError::from)?;
    tracing::debug!("Discovered {} package(s) in {}", packages.len(), packages_dir);

    Ok(PassInput {
        packages,
        load_order: profile
            .load_order
            .iter()
            .map(|id| PackageId::from(id.as_str()))
            .collect(),
        selections: parse_selections(profile)?,
    })
}
