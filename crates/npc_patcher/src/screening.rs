//! Validation of per-character appearance selections.
//!
//! Screening answers, for one character and the package the user picked:
//! does that package define an override for the character, and does it ship
//! the character's FaceGen assets? Either one is enough for the selection to
//! be usable. Absence is never an error; it is encoded in the result.

use crate::catalog::Catalog;
use crate::content::ContentSource;
use crate::model::{CharacterKey, OverrideRecord, PackageId, RecordKind};
use crate::package::Package;
use crate::resolver::{WinningMap, WinningState};
use crate::utils::required_asset_paths;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-character user choice: character -> package supplying its appearance.
/// A character missing from the map is unset.
pub type Selections = BTreeMap<CharacterKey, PackageId>;

/// Why a character could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnresolvedReason {
    /// No package was selected for the character.
    NoSelection,
    /// The selected package is not installed.
    UnknownPackage,
    /// The selected package has neither a record override nor the assets.
    NoOverrideOrAssets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningResult {
    pub key: CharacterKey,
    pub selection: Option<PackageId>,
    /// `has_package_override || has_required_assets`.
    pub selection_is_valid: bool,
    pub has_package_override: bool,
    pub has_required_assets: bool,
    /// The selected package's own record for the character.
    pub specific_override: Option<OverrideRecord>,
    /// The load-order winner, independent of the selection. `None` only when
    /// no active package defines the character.
    pub winning_override: Option<OverrideRecord>,
    /// The selected package, when it is installed.
    pub resolved_package: Option<PackageId>,
    pub reason: Option<UnresolvedReason>,
}

impl ScreeningResult {
    /// The record the patch should carry: the selected package's own override
    /// if it has one, otherwise the load-order winner.
    pub fn effective_override(&self) -> Option<&OverrideRecord> {
        self.specific_override
            .as_ref()
            .or(self.winning_override.as_ref())
    }
}

/// Whether every required asset of `key` exists somewhere in the package's
/// layers. Layers are searched override-first.
fn has_required_assets(
    key: &CharacterKey,
    package: &Package,
    source: &dyn ContentSource,
) -> bool {
    required_asset_paths(key).iter().all(|relative| {
        package
            .layers_override_first()
            .any(|(_, layer)| source.asset_exists(layer, relative))
    })
}

/// Screen one character's selection. Pure: reads its inputs, touches no shared state.
pub fn screen(
    key: &CharacterKey,
    selection: Option<&PackageId>,
    winning: Option<&WinningState>,
    catalog: &Catalog,
    source: &dyn ContentSource,
) -> ScreeningResult {
    let winning_override = winning.map(|w| w.winner.clone());

    let mut result = ScreeningResult {
        key: key.clone(),
        selection: selection.cloned(),
        selection_is_valid: false,
        has_package_override: false,
        has_required_assets: false,
        specific_override: None,
        winning_override,
        resolved_package: None,
        reason: None,
    };

    let Some(selected) = selection else {
        result.reason = Some(UnresolvedReason::NoSelection);
        return result;
    };

    let Some(entry) = catalog.get(selected) else {
        tracing::debug!("Character {} selects unknown package '{}'", key, selected);
        result.reason = Some(UnresolvedReason::UnknownPackage);
        return result;
    };

    result.resolved_package = Some(entry.package.id().clone());
    result.specific_override = entry.index.get(RecordKind::Npc, key).cloned();
    result.has_package_override = result.specific_override.is_some();
    result.has_required_assets = has_required_assets(key, &entry.package, source);
    result.selection_is_valid = result.has_package_override || result.has_required_assets;
    if !result.selection_is_valid {
        result.reason = Some(UnresolvedReason::NoOverrideOrAssets);
    }

    tracing::trace!(
        "Screened {} selection={} override={} assets={}",
        key,
        selected,
        result.has_package_override,
        result.has_required_assets
    );

    result
}

/// Screen every character that is either defined by the load order or selected.
/// Runs per character on the rayon pool; results are ordered by key.
pub fn screen_all(
    selections: &Selections,
    winning: &WinningMap,
    catalog: &Catalog,
    source: &dyn ContentSource,
) -> Vec<ScreeningResult> {
    let keys: Vec<&CharacterKey> = winning
        .keys()
        .chain(selections.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let results: Vec<ScreeningResult> = keys
        .par_iter()
        .map(|&key| screen(key, selections.get(key), winning.get(key), catalog, source))
        .collect();

    tracing::info!(
        "Screened {} character(s): {} valid, {} unresolved",
        results.len(),
        results.iter().filter(|r| r.selection_is_valid).count(),
        results.iter().filter(|r| !r.selection_is_valid).count()
    );

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::content::MemoryContentSource;
    use crate::model::{FormKey, Properties, Record};
    use crate::resolver::{index_package, resolve};
    use camino::Utf8PathBuf;
    use std::sync::Arc;

    fn npc(key: &FormKey) -> Record {
        Record::new(key.clone(), RecordKind::Npc, Properties::new())
    }

    fn build_catalog(source: &MemoryContentSource, packages: &[(&str, &[&str])]) -> Catalog {
        let mut catalog = Catalog::new();
        for (id, layers) in packages {
            let package = Package::new(
                *id,
                *id,
                layers.iter().map(|l| Utf8PathBuf::from(*l)).collect(),
            )
            .unwrap();
            let index = index_package(&package, source, &CancelToken::new()).unwrap();
            catalog.insert(package, Arc::new(index));
        }
        catalog
    }

    /// Validity for each (override, assets) combination.
    #[test]
    fn test_validity_truth_table() {
        let cases = [(false, false), (true, false), (false, true), (true, true)];
        for (with_override, with_assets) in cases {
            let key = FormKey::new(0x800, "Skyrim.esm");
            let mut source = MemoryContentSource::new();
            source.add_layer("/sel");
            if with_override {
                source.insert_record("/sel", npc(&key));
            }
            if with_assets {
                source.insert_facegen("/sel", &key);
            }
            let catalog = build_catalog(&source, &[("sel", &["/sel"])]);

            let result = screen(&key, Some(&PackageId::from("sel")), None, &catalog, &source);
            assert_eq!(result.has_package_override, with_override);
            assert_eq!(result.has_required_assets, with_assets);
            assert_eq!(result.selection_is_valid, with_override || with_assets);
            assert_eq!(
                result.reason.is_none(),
                with_override || with_assets,
                "case override={with_override} assets={with_assets}"
            );
        }
    }

    #[test]
    fn test_unset_selection() {
        let key = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source.insert_record("/base", npc(&key)).insert_facegen("/base", &key);
        let catalog = build_catalog(&source, &[("base", &["/base"])]);
        let winning = resolve(&[PackageId::from("base")], &catalog, RecordKind::Npc);

        let result = screen(&key, None, winning.get(&key), &catalog, &source);
        assert!(!result.has_package_override);
        assert!(result.specific_override.is_none());
        assert!(!result.selection_is_valid);
        assert_eq!(result.reason, Some(UnresolvedReason::NoSelection));
        assert_eq!(
            result.winning_override.unwrap().package,
            PackageId::from("base")
        );
    }

    #[test]
    fn test_unknown_package() {
        let key = FormKey::new(0x800, "Skyrim.esm");
        let source = MemoryContentSource::new();
        let catalog = Catalog::new();

        let result = screen(&key, Some(&PackageId::from("gone")), None, &catalog, &source);
        assert!(!result.selection_is_valid);
        assert!(result.resolved_package.is_none());
        assert_eq!(result.reason, Some(UnresolvedReason::UnknownPackage));
    }

    #[test]
    fn test_assets_split_across_layers() {
        let key = FormKey::new(0x800, "Skyrim.esm");
        let [mesh, tint] = required_asset_paths(&key);
        let mut source = MemoryContentSource::new();
        source.insert_asset("/sel/base", &mesh).insert_asset("/sel/fix", &tint);
        let catalog = build_catalog(&source, &[("sel", &["/sel/base", "/sel/fix"])]);

        let result = screen(&key, Some(&PackageId::from("sel")), None, &catalog, &source);
        assert!(result.has_required_assets);
        assert!(!result.has_package_override);
        assert!(result.selection_is_valid);
    }

    #[test]
    fn test_partial_assets_not_enough() {
        let key = FormKey::new(0x800, "Skyrim.esm");
        let [mesh, _] = required_asset_paths(&key);
        let mut source = MemoryContentSource::new();
        source.insert_asset("/sel", &mesh);
        let catalog = build_catalog(&source, &[("sel", &["/sel"])]);

        let result = screen(&key, Some(&PackageId::from("sel")), None, &catalog, &source);
        assert!(!result.has_required_assets);
        assert!(!result.selection_is_valid);
    }

    #[test]
    fn test_winning_override_populated_when_selection_invalid() {
        let key = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source.insert_record("/base", npc(&key)).add_layer("/empty");
        let catalog = build_catalog(&source, &[("base", &["/base"]), ("empty", &["/empty"])]);
        let winning = resolve(&[PackageId::from("base")], &catalog, RecordKind::Npc);

        let result = screen(
            &key,
            Some(&PackageId::from("empty")),
            winning.get(&key),
            &catalog,
            &source,
        );
        assert!(!result.selection_is_valid);
        assert!(result.winning_override.is_some());
        assert_eq!(result.resolved_package, Some(PackageId::from("empty")));
    }

    #[test]
    fn test_screen_all_covers_selected_and_winning_keys() {
        let defined = FormKey::new(0x800, "Skyrim.esm");
        let selected_only = FormKey::new(0x900, "New.esp");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/base", npc(&defined))
            .insert_facegen("/look", &selected_only);
        let catalog = build_catalog(&source, &[("base", &["/base"]), ("look", &["/look"])]);
        let winning = resolve(&[PackageId::from("base")], &catalog, RecordKind::Npc);

        let mut selections = Selections::new();
        selections.insert(selected_only.clone(), PackageId::from("look"));

        let results = screen_all(&selections, &winning, &catalog, &source);
        assert_eq!(results.len(), 2);
        assert!(results.windows(2).all(|w| w[0].key < w[1].key));

        let defined_result = results.iter().find(|r| r.key == defined).unwrap();
        assert_eq!(defined_result.reason, Some(UnresolvedReason::NoSelection));

        let selected_result = results.iter().find(|r| r.key == selected_only).unwrap();
        assert!(selected_result.selection_is_valid);
        assert!(selected_result.winning_override.is_none());
    }
}
