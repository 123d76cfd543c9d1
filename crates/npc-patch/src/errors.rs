use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Profile not found: {path}")]
    #[diagnostic(
        code(profile::not_found),
        help("Pass --profile <path> or create a profile.toml in the current directory")
    )]
    ProfileNotFound { path: Utf8PathBuf },

    #[error("Profile could not be read: {path}")]
    #[diagnostic(
        code(profile::parse_error),
        help("Check the profile for TOML syntax errors and unknown policy names")
    )]
    ProfileParseError {
        path: Utf8PathBuf,
        #[source]
        source: npc_package::Error,
    },

    #[error("Invalid NPC key in selections: {key}")]
    #[diagnostic(
        code(profile::invalid_selection),
        help("Selection keys look like \"0A1B2C:Skyrim.esm\" (hex local id, then the origin plugin)")
    )]
    InvalidSelectionKey {
        key: String,
        #[source]
        source: npc_patcher::Error,
    },

    #[error("Packages directory not found: {path}")]
    #[diagnostic(
        code(packages::not_found),
        help("Set packages_dir in the profile to the folder holding one subfolder per package")
    )]
    PackagesDirMissing { path: Utf8PathBuf },

    #[error("Resolution pass failed")]
    #[diagnostic(code(pass::failed))]
    Pass {
        #[from]
        source: npc_patcher::Error,
    },
}

impl CliError {
    pub fn profile_not_found(path: Utf8PathBuf) -> Self {
        Self::ProfileNotFound { path }
    }

    pub fn invalid_selection_key(key: String, source: npc_patcher::Error) -> Self {
        Self::InvalidSelectionKey { key, source }
    }
}
