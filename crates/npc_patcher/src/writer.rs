//! Patch artifact assembly and persistence.
//!
//! The artifact is plain JSON so external tooling (or a later conversion step
//! into the game's binary format) can consume it.
//!
//! # JSON format
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": [
//!     {
//!       "key": "000800:Skyrim.esm",
//!       "sourcePackage": "mod-a",
//!       "record": { "key": "000800:Skyrim.esm", "kind": "npc", "properties": {} },
//!       "forwarded": { "eyeColor": { "old": "brown", "new": "blue" } },
//!       "dependent": { "key": "013746:Skyrim.esm", "kind": "race", "properties": {} }
//!     }
//!   ],
//!   "conflicts": []
//! }
//! ```

use crate::error::Result;
use crate::forwarding::{DependentConflict, DependentRecordDiff, ForwardingReport};
use crate::model::{CharacterKey, PackageId, Record};
use crate::screening::{ScreeningResult, UnresolvedReason};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};

pub const PATCH_VERSION: u32 = 1;

/// One patched character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEntry {
    pub key: CharacterKey,
    /// Package the emitted record came from.
    pub source_package: PackageId,
    pub record: Record,
    /// Dependent-record edits forwarded for this character.
    #[serde(default, skip_serializing_if = "DependentRecordDiff::is_empty")]
    pub forwarded: DependentRecordDiff,
    /// Merged dependent record, present when something was forwarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent: Option<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchArtifact {
    pub version: u32,
    pub entries: Vec<PatchEntry>,
    #[serde(default)]
    pub conflicts: Vec<DependentConflict>,
}

impl Default for PatchArtifact {
    fn default() -> Self {
        Self {
            version: PATCH_VERSION,
            entries: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

impl PatchArtifact {
    pub fn get(&self, key: &CharacterKey) -> Option<&PatchEntry> {
        self.entries.iter().find(|entry| entry.key == *key)
    }

    pub fn contains(&self, key: &CharacterKey) -> bool {
        self.get(key).is_some()
    }

    /// Load an artifact from disk.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the artifact as pretty JSON. Creates parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_std_path(), contents)?;
        Ok(())
    }
}

/// A character left out of the patch and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedCharacter {
    pub key: CharacterKey,
    pub selection: Option<PackageId>,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOutput {
    pub artifact: PatchArtifact,
    pub unresolved: Vec<UnresolvedCharacter>,
}

/// Assemble the patch from screening results and forwarded dependent edits.
///
/// Valid characters are emitted with their effective override. Invalid ones are
/// never dropped silently: each lands in `unresolved` with its reason.
pub fn write_patch(results: &[ScreeningResult], forwarding: &ForwardingReport) -> PatchOutput {
    let mut output = PatchOutput::default();

    for result in results {
        if !result.selection_is_valid {
            output.unresolved.push(UnresolvedCharacter {
                key: result.key.clone(),
                selection: result.selection.clone(),
                reason: result.reason.unwrap_or(UnresolvedReason::NoOverrideOrAssets),
            });
            continue;
        }

        let Some(effective) = result.effective_override() else {
            // Assets only and nothing defines the record anywhere.
            tracing::debug!(
                "Character {} has assets in {:?} but no record to emit",
                result.key,
                result.selection
            );
            output.unresolved.push(UnresolvedCharacter {
                key: result.key.clone(),
                selection: result.selection.clone(),
                reason: UnresolvedReason::NoOverrideOrAssets,
            });
            continue;
        };

        let forwarded = forwarding
            .diffs
            .get(&result.key)
            .map(|f| f.diff.clone())
            .unwrap_or_default();
        let dependent = forwarding.dependent_for(&result.key).cloned();

        // Assets-only selections keep the winner's record but credit the
        // selected package, which supplies the face.
        let source_package = result
            .resolved_package
            .clone()
            .unwrap_or_else(|| effective.package.clone());

        output.artifact.entries.push(PatchEntry {
            key: result.key.clone(),
            source_package,
            record: effective.record.as_ref().clone(),
            forwarded,
            dependent,
        });
    }

    output.artifact.conflicts = forwarding.conflicts.clone();

    tracing::info!(
        "Patch: {} entr(ies), {} unresolved character(s)",
        output.artifact.entries.len(),
        output.unresolved.len()
    );

    output
}
