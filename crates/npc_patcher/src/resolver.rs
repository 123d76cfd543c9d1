//! Two-level override resolution.
//!
//! Resolution happens in two steps:
//!
//! 1. **Intra-package** ([`index_package`]): walk a package's layers base first;
//!    a later layer's record replaces an earlier layer's record for the same key.
//!    The result is a [`PackageIndex`], the package's own winner per key.
//! 2. **Inter-package** ([`resolve`]): walk the active load order lowest
//!    precedence first; the last package whose index defines a key wins.
//!    Packages outside the load order never participate.
//!
//! Keys are independent, so step 2 runs on the rayon pool, one task per key.

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::content::ContentSource;
use crate::error::Result;
use crate::model::{FormKey, OverrideRecord, PackageId, Record, RecordKind};
use crate::package::Package;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A package's own winning record per key, after layer precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageIndex {
    pub package: PackageId,
    pub npcs: BTreeMap<FormKey, OverrideRecord>,
    pub races: BTreeMap<FormKey, OverrideRecord>,
    /// Layers that were unavailable or failed to read and contributed nothing.
    #[serde(default)]
    pub degraded_layers: Vec<usize>,
}

impl PackageIndex {
    pub fn new(package: PackageId) -> Self {
        Self {
            package,
            npcs: BTreeMap::new(),
            races: BTreeMap::new(),
            degraded_layers: Vec::new(),
        }
    }

    pub fn records(&self, kind: RecordKind) -> &BTreeMap<FormKey, OverrideRecord> {
        match kind {
            RecordKind::Npc => &self.npcs,
            RecordKind::Race => &self.races,
        }
    }

    fn records_mut(&mut self, kind: RecordKind) -> &mut BTreeMap<FormKey, OverrideRecord> {
        match kind {
            RecordKind::Npc => &mut self.npcs,
            RecordKind::Race => &mut self.races,
        }
    }

    pub fn get(&self, kind: RecordKind, key: &FormKey) -> Option<&OverrideRecord> {
        self.records(kind).get(key)
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_layers.is_empty()
    }
}

/// Resolve a package's layers into its [`PackageIndex`].
///
/// A layer the source reports as unavailable, or that fails to load, is
/// skipped as a whole and recorded in `degraded_layers`; the remaining layers
/// still resolve. The token is checked before each layer.
pub fn index_package(
    package: &Package,
    source: &dyn ContentSource,
    cancel: &CancelToken,
) -> Result<PackageIndex> {
    let mut index = PackageIndex::new(package.id().clone());

    for (layer_idx, layer) in package.layers().iter().enumerate() {
        cancel.check()?;

        if !source.layer_available(layer) {
            tracing::warn!(
                "Package={} layer {} unavailable, skipping: {}",
                package.id(),
                layer_idx,
                layer
            );
            index.degraded_layers.push(layer_idx);
            continue;
        }

        let loaded: Result<Vec<(RecordKind, Vec<Record>)>> = RecordKind::ALL
            .iter()
            .map(|&kind| -> Result<(RecordKind, Vec<Record>)> {
                Ok((kind, source.load_layer(layer, kind)?))
            })
            .collect();
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(
                    "Package={} layer {} failed to load, skipping: {}",
                    package.id(),
                    layer_idx,
                    e
                );
                index.degraded_layers.push(layer_idx);
                continue;
            }
        };

        for (kind, records) in loaded {
            let count = records.len();
            let target = index.records_mut(kind);
            for record in records {
                let key = record.key.clone();
                let previous = target.insert(
                    key.clone(),
                    OverrideRecord {
                        record: Arc::new(record),
                        package: package.id().clone(),
                        layer: layer_idx,
                    },
                );
                if let Some(previous) = previous {
                    tracing::trace!(
                        "Package={} key={} layer {} overrides layer {}",
                        package.id(),
                        key,
                        layer_idx,
                        previous.layer
                    );
                }
            }
            tracing::debug!(
                "Package={} layer {} kind={:?} records={}",
                package.id(),
                layer_idx,
                kind,
                count
            );
        }
    }

    Ok(index)
}

/// The load-order winner for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinningState {
    pub winner: OverrideRecord,
    /// Every active package defining the key, in load order. The last one is
    /// the winner's package.
    pub contenders: Vec<PackageId>,
}

impl WinningState {
    pub fn is_conflicted(&self) -> bool {
        self.contenders.len() > 1
    }
}

pub type WinningMap = BTreeMap<FormKey, WinningState>;

/// Indexes of the load-order packages, lowest precedence first. Entries
/// without an index are skipped.
fn active_indexes<'a>(load_order: &[PackageId], catalog: &'a Catalog) -> Vec<&'a PackageIndex> {
    load_order
        .iter()
        .filter_map(|id| {
            let index = catalog.index(id);
            if index.is_none() {
                tracing::warn!("Load order entry '{}' has no index; ignoring", id);
            }
            index
        })
        .collect()
}

/// Resolve every `kind` key defined by the active packages to its load-order winner.
pub fn resolve(load_order: &[PackageId], catalog: &Catalog, kind: RecordKind) -> WinningMap {
    let active = active_indexes(load_order, catalog);

    let keys: BTreeSet<&FormKey> = active
        .iter()
        .flat_map(|index| index.records(kind).keys())
        .collect();

    let resolved: WinningMap = keys
        .into_par_iter()
        .filter_map(|key| {
            let mut contenders = Vec::new();
            let mut winner = None;
            for index in &active {
                if let Some(record) = index.get(kind, key) {
                    contenders.push(index.package.clone());
                    winner = Some(record);
                }
            }
            winner.map(|winner| {
                (
                    key.clone(),
                    WinningState {
                        winner: winner.clone(),
                        contenders,
                    },
                )
            })
        })
        .collect();

    tracing::info!(
        "Resolved {} {:?} key(s) across {} active package(s), {} conflicted",
        resolved.len(),
        kind,
        active.len(),
        resolved.values().filter(|s| s.is_conflicted()).count()
    );

    resolved
}

/// [`resolve`] over dependent (race) records.
pub fn resolve_dependents(load_order: &[PackageId], catalog: &Catalog) -> WinningMap {
    resolve(load_order, catalog, RecordKind::Race)
}

/// The record state `package` itself builds on for `key`.
///
/// If `package` is in the load order this is the winner among the packages
/// before it. Otherwise it is the origin version: the first active package
/// defining the key.
pub fn base_state_for<'a>(
    package: &PackageId,
    load_order: &[PackageId],
    catalog: &'a Catalog,
    kind: RecordKind,
    key: &FormKey,
) -> Option<&'a OverrideRecord> {
    match load_order.iter().position(|id| id == package) {
        Some(position) => active_indexes(&load_order[..position], catalog)
            .into_iter()
            .rev()
            .find_map(|index| index.get(kind, key)),
        None => active_indexes(load_order, catalog)
            .into_iter()
            .find_map(|index| index.get(kind, key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MemoryContentSource;
    use crate::model::Properties;
    use camino::Utf8PathBuf;
    use serde_json::json;

    fn npc(key: &FormKey, marker: &str) -> Record {
        let mut properties = Properties::new();
        properties.insert("marker".to_string(), json!(marker));
        Record::new(key.clone(), RecordKind::Npc, properties)
    }

    fn marker(state: &OverrideRecord) -> &str {
        state.record.get("marker").and_then(|v| v.as_str()).unwrap()
    }

    fn package(id: &str, layers: &[&str]) -> Package {
        Package::new(
            id,
            id,
            layers.iter().map(|l| Utf8PathBuf::from(*l)).collect(),
        )
        .unwrap()
    }

    fn catalog_of(packages: Vec<Package>, source: &MemoryContentSource) -> Catalog {
        let cancel = CancelToken::new();
        let mut catalog = Catalog::new();
        for package in packages {
            let index = index_package(&package, source, &cancel).unwrap();
            catalog.insert(package, Arc::new(index));
        }
        catalog
    }

    #[test]
    fn test_index_of_empty_package() {
        let mut source = MemoryContentSource::new();
        source.add_layer("/empty");
        let package = package("empty", &["/empty"]);

        let index = index_package(&package, &source, &CancelToken::new()).unwrap();
        assert_eq!(index, PackageIndex::new(PackageId::from("empty")));
        assert!(index.records(RecordKind::Npc).is_empty());
        assert!(index.records(RecordKind::Race).is_empty());
        assert!(!index.is_degraded());
    }

    #[test]
    fn test_last_package_in_load_order_wins() {
        let k = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/a", npc(&k, "a"))
            .add_layer("/b")
            .insert_record("/c", npc(&k, "c"));

        let catalog = catalog_of(
            vec![package("a", &["/a"]), package("b", &["/b"]), package("c", &["/c"])],
            &source,
        );
        let order: Vec<PackageId> = ["a", "b", "c"].into_iter().map(PackageId::from).collect();

        let winning = resolve(&order, &catalog, RecordKind::Npc);
        let state = &winning[&k];
        assert_eq!(state.winner.package.as_str(), "c");
        assert_eq!(marker(&state.winner), "c");
        assert_eq!(state.contenders, vec![PackageId::from("a"), PackageId::from("c")]);
    }

    #[test]
    fn test_override_layer_wins_inside_package() {
        let k = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/m/base", npc(&k, "base"))
            .insert_record("/m/override", npc(&k, "override"));

        let index = index_package(
            &package("m", &["/m/base", "/m/override"]),
            &source,
            &CancelToken::new(),
        )
        .unwrap();

        let record = index.get(RecordKind::Npc, &k).unwrap();
        assert_eq!(record.layer, 1);
        assert_eq!(marker(record), "override");
    }

    #[test]
    fn test_inactive_packages_excluded() {
        let k = FormKey::new(0x800, "Skyrim.esm");
        let only_inactive = FormKey::new(0x801, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/a", npc(&k, "a"))
            .insert_record("/z", npc(&k, "z"))
            .insert_record("/z", npc(&only_inactive, "z"));

        let catalog = catalog_of(vec![package("a", &["/a"]), package("z", &["/z"])], &source);
        let winning = resolve(&[PackageId::from("a")], &catalog, RecordKind::Npc);

        assert_eq!(marker(&winning[&k].winner), "a");
        assert!(!winning.contains_key(&only_inactive));
    }

    #[test]
    fn test_load_order_change_changes_winner() {
        let k = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/a", npc(&k, "a"))
            .insert_record("/b", npc(&k, "b"));
        let catalog = catalog_of(vec![package("a", &["/a"]), package("b", &["/b"])], &source);

        let forward = resolve(
            &[PackageId::from("a"), PackageId::from("b")],
            &catalog,
            RecordKind::Npc,
        );
        let reversed = resolve(
            &[PackageId::from("b"), PackageId::from("a")],
            &catalog,
            RecordKind::Npc,
        );
        assert_eq!(marker(&forward[&k].winner), "b");
        assert_eq!(marker(&reversed[&k].winner), "a");
    }

    #[test]
    fn test_unavailable_layer_degrades_package() {
        let k = FormKey::new(0x800, "Skyrim.esm");
        let mut source = MemoryContentSource::new();
        source.insert_record("/m/base", npc(&k, "base"));

        let index = index_package(
            &package("m", &["/m/base", "/m/removed"]),
            &source,
            &CancelToken::new(),
        )
        .unwrap();

        assert!(index.is_degraded());
        assert_eq!(index.degraded_layers, vec![1]);
        assert_eq!(marker(index.get(RecordKind::Npc, &k).unwrap()), "base");
    }

    #[test]
    fn test_index_package_cancelled() {
        let source = MemoryContentSource::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = index_package(&package("m", &["/m"]), &source, &cancel);
        assert!(matches!(result, Err(crate::Error::Cancelled)));
    }

    #[test]
    fn test_base_state_for() {
        let race = FormKey::new(0x13746, "Skyrim.esm");
        let race_record = |marker: &str| {
            let mut properties = Properties::new();
            properties.insert("marker".to_string(), json!(marker));
            Record::new(race.clone(), RecordKind::Race, properties)
        };
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/base", race_record("base"))
            .insert_record("/mid", race_record("mid"))
            .insert_record("/look", race_record("look"));
        let catalog = catalog_of(
            vec![
                package("base", &["/base"]),
                package("mid", &["/mid"]),
                package("look", &["/look"]),
            ],
            &source,
        );

        let order: Vec<PackageId> = ["base", "mid", "look"].into_iter().map(PackageId::from).collect();
        let base = base_state_for(&PackageId::from("look"), &order, &catalog, RecordKind::Race, &race);
        assert_eq!(marker(base.unwrap()), "mid");

        let inactive_order: Vec<PackageId> = ["base", "mid"].into_iter().map(PackageId::from).collect();
        let origin = base_state_for(
            &PackageId::from("look"),
            &inactive_order,
            &catalog,
            RecordKind::Race,
            &race,
        );
        assert_eq!(marker(origin.unwrap()), "base");

        let first = base_state_for(&PackageId::from("base"), &order, &catalog, RecordKind::Race, &race);
        assert!(first.is_none());
    }
}
