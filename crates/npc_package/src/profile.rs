//! Pass profiles (`profile.toml`).
//!
//! A profile is the plain, read-only input to one resolution pass: where the
//! packages live, which of them are active and in what order, which package
//! each NPC takes its appearance from, and how dependent records are merged.
//!
//! ```toml
//! packages_dir = "packages"
//! output = "out/patch.json"
//! load_order = ["base", "mod-a"]
//! forwarding = "forward-winning-overrides"
//! dependent_instances = "shared"
//! tie_break = "last-processed-wins"
//!
//! [selections]
//! "000800:Skyrim.esm" = "mod-a"
//! ```

use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How edits an appearance package makes to a shared dependent record are handled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardingPolicy {
    /// Forward the appearance package's own changes onto the load-order winner.
    #[default]
    ForwardWinningOverrides,
    /// Skip dependent-record reconciliation and keep the load-order winner as is.
    IgnoreRace,
}

/// Whether characters sharing a dependent record get their own merged copy.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependentInstanceMode {
    /// Every character gets its own copy of the dependent record.
    #[default]
    PerCharacter,
    /// One merged instance per dependent record; conflicting edits go through the tie-break.
    Shared,
}

/// Tie-break for conflicting edits on a shared dependent record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The character processed last (in key order) supplies the value.
    #[default]
    LastProcessedWins,
    /// The conflicting property keeps the load-order winner's value.
    KeepLoadOrderWinner,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    /// Folder whose subfolders are the installed packages.
    pub packages_dir: Utf8PathBuf,

    /// Destination of the merged patch.
    pub output: Utf8PathBuf,

    /// Optional persisted snapshot cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<Utf8PathBuf>,

    /// Active package ids, lowest precedence first.
    #[serde(default)]
    pub load_order: Vec<String>,

    /// NPC form key (`"0A1B2C:Plugin.esp"`) -> package id supplying its appearance.
    #[serde(default)]
    pub selections: BTreeMap<String, String>,

    #[serde(default)]
    pub forwarding: ForwardingPolicy,

    #[serde(default)]
    pub dependent_instances: DependentInstanceMode,

    #[serde(default)]
    pub tie_break: TieBreak,

    /// Spread per-package and per-character work across all cores.
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Directory relative paths are resolved against (the profile's folder).
    #[serde(skip)]
    root: Utf8PathBuf,
}

fn default_parallel() -> bool {
    true
}

impl Profile {
    /// Load a profile from a TOML file. Relative paths inside it resolve
    /// against the file's directory.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_std_path())?;
        let mut profile = Self::from_toml_str(&contents)?;
        profile.root = path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        Ok(profile)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn packages_dir(&self) -> Utf8PathBuf {
        self.resolve(&self.packages_dir)
    }

    pub fn output_path(&self) -> Utf8PathBuf {
        self.resolve(&self.output)
    }

    pub fn cache_path(&self) -> Option<Utf8PathBuf> {
        self.cache_path.as_deref().map(|p| self.resolve(p))
    }
}
