//! Dependent-record forwarding.
//!
//! An appearance package often edits the race its characters belong to
//! (new head parts, eye colours, and so on). Patching only the character
//! would lose those edits; patching in the appearance package's whole race
//! record would discard edits made by later packages in the load order.
//!
//! Under [`ForwardingPolicy::ForwardWinningOverrides`] the engine instead
//! computes the properties the appearance package itself changed (compared to
//! the race state it was built on) and applies only those onto a copy of the
//! load-order winner. [`ForwardingPolicy::IgnoreRace`] skips all of this.
//!
//! When several characters share a race their diffs either land on separate
//! per-character copies ([`DependentInstanceMode::PerCharacter`]) or are merged
//! into one instance ([`DependentInstanceMode::Shared`]); in the shared case,
//! incompatible edits are recorded as [`DependentConflict`]s and settled by the
//! configured [`TieBreak`].

use crate::catalog::Catalog;
use crate::model::{CharacterKey, FormKey, PackageId, Properties, Record, RecordKind};
use crate::resolver::{base_state_for, WinningMap};
use crate::screening::ScreeningResult;
use npc_package::{DependentInstanceMode, ForwardingPolicy, TieBreak};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Old and new value of one forwarded property. `None` means absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

/// Property-level changes between two versions of a dependent record.
pub type DependentRecordDiff = BTreeMap<String, PropertyChange>;

/// Forwarding configuration, chosen by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingConfig {
    pub policy: ForwardingPolicy,
    pub instances: DependentInstanceMode,
    pub tie_break: TieBreak,
}

/// Forwarding outcome for one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterForwarding {
    pub dependent: FormKey,
    pub appearance_package: PackageId,
    pub diff: DependentRecordDiff,
}

/// Two or more characters forced different values onto one property of a
/// shared dependent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentConflict {
    pub dependent: FormKey,
    pub property: String,
    /// Every character that edited the property with the value it wanted, in
    /// processing order.
    pub contributions: Vec<(CharacterKey, Option<serde_json::Value>)>,
    pub resolved: Option<serde_json::Value>,
    pub tie_break: TieBreak,
}

/// Diff report of one forwarding run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingReport {
    /// Non-empty diffs per character.
    pub diffs: BTreeMap<CharacterKey, CharacterForwarding>,
    /// Merged dependent copy per character (per-character mode).
    pub per_character: BTreeMap<CharacterKey, Record>,
    /// Merged dependent instance per dependent key (shared mode).
    pub shared: BTreeMap<FormKey, Record>,
    /// Every valid character whose dependent has a shared instance, including
    /// characters that forwarded nothing themselves.
    #[serde(default)]
    pub shared_members: BTreeMap<CharacterKey, FormKey>,
    pub conflicts: Vec<DependentConflict>,
}

impl ForwardingReport {
    /// The merged dependent record the patch should carry for `key`, if any.
    pub fn dependent_for(&self, key: &CharacterKey) -> Option<&Record> {
        if let Some(record) = self.per_character.get(key) {
            return Some(record);
        }
        self.shared_members
            .get(key)
            .and_then(|dependent| self.shared.get(dependent))
    }
}

/// Properties `appearance` changed relative to `base` and that differ from
/// `winner`. Old values come from the winner, new values from the appearance
/// version. A missing base makes every appearance property a change.
pub fn diff_dependent(
    appearance: &Record,
    base: Option<&Record>,
    winner: Option<&Record>,
) -> DependentRecordDiff {
    let empty = Properties::new();
    let base_props = base.map(|r| &r.properties).unwrap_or(&empty);
    let winner_props = winner.map(|r| &r.properties).unwrap_or(&empty);

    let names: BTreeSet<&String> = appearance
        .properties
        .keys()
        .chain(base_props.keys())
        .collect();

    let mut diff = DependentRecordDiff::new();
    for name in names {
        let new = appearance.properties.get(name);
        if new == base_props.get(name) {
            continue;
        }
        let old = winner_props.get(name);
        if new == old {
            continue;
        }
        diff.insert(
            name.clone(),
            PropertyChange {
                old: old.cloned(),
                new: new.cloned(),
            },
        );
    }
    diff
}

/// Copy of `winner` (or an empty record of `key` when there is none) with
/// `diff` applied. A change to `None` removes the property.
pub fn apply_diff(winner: Option<&Record>, key: &FormKey, diff: &DependentRecordDiff) -> Record {
    let mut merged = winner
        .cloned()
        .unwrap_or_else(|| Record::new(key.clone(), RecordKind::Race, Properties::new()));
    for (name, change) in diff {
        match &change.new {
            Some(value) => {
                merged.properties.insert(name.clone(), value.clone());
            }
            None => {
                merged.properties.remove(name);
            }
        }
    }
    merged
}

/// What one character's appearance package does to its dependent record.
struct CharacterEdits {
    /// Changes to forward onto the load-order winner.
    forwarding: CharacterForwarding,
    /// Every property the appearance package changed relative to its base,
    /// whether or not the winner already agrees.
    own: DependentRecordDiff,
}

/// Compute the dependent-record edits for one screened character.
///
/// Returns `None` when forwarding does not apply: invalid selection, no
/// dependent reference, or the appearance package does not touch the
/// dependent record at all. When the appearance package's version is itself
/// the winner the forwarded diff is empty but its own edits still count.
fn forward_character(
    result: &ScreeningResult,
    dependents_winning: &WinningMap,
    catalog: &Catalog,
    load_order: &[PackageId],
) -> Option<CharacterEdits> {
    if !result.selection_is_valid {
        return None;
    }
    let appearance_package = result.resolved_package.as_ref()?;
    let dependent = result.effective_override()?.record.race()?;
    let appearance = catalog
        .index(appearance_package)?
        .get(RecordKind::Race, &dependent)?;

    let base = base_state_for(
        appearance_package,
        load_order,
        catalog,
        RecordKind::Race,
        &dependent,
    )
    .map(|b| b.record.as_ref());
    let winner = dependents_winning
        .get(&dependent)
        .map(|w| w.winner.record.as_ref());

    let diff = diff_dependent(&appearance.record, base, winner);
    let own = diff_dependent(&appearance.record, base, base);

    tracing::trace!(
        "Character {} dependent {} from {}: {} forwarded, {} own propert(ies)",
        result.key,
        dependent,
        appearance_package,
        diff.len(),
        own.len()
    );

    Some(CharacterEdits {
        forwarding: CharacterForwarding {
            dependent,
            appearance_package: appearance_package.clone(),
            diff,
        },
        own,
    })
}

/// Merge the edits of every character sharing a dependent record onto one
/// instance, recording conflicts.
fn merge_shared(
    dependent: &FormKey,
    winner: Option<&Record>,
    contributions: &[(&CharacterKey, &DependentRecordDiff)],
    tie_break: TieBreak,
    conflicts: &mut Vec<DependentConflict>,
) -> Record {
    // property -> every (character, value) that edited it, in processing order
    let mut edits: BTreeMap<&String, Vec<(&CharacterKey, &Option<serde_json::Value>)>> =
        BTreeMap::new();
    for &(character, diff) in contributions {
        for (name, change) in diff {
            edits.entry(name).or_default().push((character, &change.new));
        }
    }

    let mut merged_diff = DependentRecordDiff::new();
    for (name, values) in edits {
        let old = winner.and_then(|w| w.get(name)).cloned();
        let Some((_, last)) = values.last() else {
            continue;
        };
        let disagree = values.iter().any(|(_, v)| v != last);

        let resolved = if !disagree {
            (*last).clone()
        } else {
            let resolved = match tie_break {
                TieBreak::LastProcessedWins => (*last).clone(),
                TieBreak::KeepLoadOrderWinner => old.clone(),
            };
            tracing::warn!(
                "Conflicting edits to {} property '{}' from {} character(s); {:?}",
                dependent,
                name,
                values.len(),
                tie_break
            );
            conflicts.push(DependentConflict {
                dependent: dependent.clone(),
                property: name.clone(),
                contributions: values
                    .iter()
                    .map(|(c, v)| ((*c).clone(), (*v).clone()))
                    .collect(),
                resolved: resolved.clone(),
                tie_break,
            });
            resolved
        };

        if resolved != old {
            merged_diff.insert(name.clone(), PropertyChange { old, new: resolved });
        }
    }

    apply_diff(winner, dependent, &merged_diff)
}

/// Run dependency forwarding over all screening results.
pub fn forward_dependencies(
    results: &[ScreeningResult],
    dependents_winning: &WinningMap,
    catalog: &Catalog,
    load_order: &[PackageId],
    config: &ForwardingConfig,
) -> ForwardingReport {
    let mut report = ForwardingReport::default();
    if config.policy == ForwardingPolicy::IgnoreRace {
        tracing::info!("Dependency forwarding skipped (ignore-race)");
        return report;
    }

    // (character, dependent, own edits) in processing order
    let mut own_edits: Vec<(CharacterKey, FormKey, DependentRecordDiff)> = Vec::new();
    for result in results {
        let Some(edits) = forward_character(result, dependents_winning, catalog, load_order) else {
            continue;
        };
        own_edits.push((
            result.key.clone(),
            edits.forwarding.dependent.clone(),
            edits.own,
        ));
        if !edits.forwarding.diff.is_empty() {
            report.diffs.insert(result.key.clone(), edits.forwarding);
        }
    }

    match config.instances {
        DependentInstanceMode::PerCharacter => {
            for (character, forwarding) in &report.diffs {
                let winner = dependents_winning
                    .get(&forwarding.dependent)
                    .map(|w| w.winner.record.as_ref());
                report.per_character.insert(
                    character.clone(),
                    apply_diff(winner, &forwarding.dependent, &forwarding.diff),
                );
            }
        }
        DependentInstanceMode::Shared => {
            // Only dependents someone forwards onto get an instance; every
            // character editing such a dependent contributes, winner included.
            let forwarded: BTreeSet<&FormKey> =
                report.diffs.values().map(|f| &f.dependent).collect();
            let mut by_dependent: BTreeMap<&FormKey, Vec<(&CharacterKey, &DependentRecordDiff)>> =
                BTreeMap::new();
            for (character, dependent, own) in &own_edits {
                if forwarded.contains(dependent) {
                    by_dependent
                        .entry(dependent)
                        .or_default()
                        .push((character, own));
                }
            }

            let mut conflicts = Vec::new();
            let mut shared = BTreeMap::new();
            for (dependent, contributions) in by_dependent {
                let winner = dependents_winning
                    .get(dependent)
                    .map(|w| w.winner.record.as_ref());
                let merged =
                    merge_shared(dependent, winner, &contributions, config.tie_break, &mut conflicts);
                shared.insert(dependent.clone(), merged);
            }

            for result in results.iter().filter(|r| r.selection_is_valid) {
                let Some(dependent) = result.effective_override().and_then(|o| o.record.race())
                else {
                    continue;
                };
                if shared.contains_key(&dependent) {
                    report.shared_members.insert(result.key.clone(), dependent);
                }
            }
            report.shared = shared;
            report.conflicts = conflicts;
        }
    }

    tracing::info!(
        "Forwarded dependent edits for {} character(s): {} per-character, {} shared, {} conflict(s)",
        report.diffs.len(),
        report.per_character.len(),
        report.shared.len(),
        report.conflicts.len()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn race(pairs: &[(&str, serde_json::Value)]) -> Record {
        Record::new(
            FormKey::new(0x13746, "Skyrim.esm"),
            RecordKind::Race,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_identical_versions_produce_empty_diff() {
        let winner = race(&[("eyeColor", json!("brown")), ("height", json!(1.0))]);
        let appearance = winner.clone();
        let base = race(&[("eyeColor", json!("green")), ("height", json!(1.0))]);

        let diff = diff_dependent(&appearance, Some(&base), Some(&winner));
        assert!(diff.is_empty());
        assert_eq!(apply_diff(Some(&winner), &winner.key, &diff), winner);
    }

    #[test]
    fn test_single_property_change_forwarded() {
        let base = race(&[("eyeColor", json!("brown")), ("height", json!(1.0))]);
        let appearance = race(&[("eyeColor", json!("blue")), ("height", json!(1.0))]);
        let winner = race(&[
            ("eyeColor", json!("brown")),
            ("height", json!(1.1)),
            ("skin", json!("tan")),
        ]);

        let diff = diff_dependent(&appearance, Some(&base), Some(&winner));
        assert_eq!(diff.len(), 1);
        assert_eq!(
            diff["eyeColor"],
            PropertyChange {
                old: Some(json!("brown")),
                new: Some(json!("blue")),
            }
        );

        let merged = apply_diff(Some(&winner), &winner.key, &diff);
        assert_eq!(merged.get("eyeColor"), Some(&json!("blue")));
        assert_eq!(merged.get("height"), Some(&json!(1.1)));
        assert_eq!(merged.get("skin"), Some(&json!("tan")));
    }

    #[test]
    fn test_removed_property_forwarded() {
        let base = race(&[("eyeColor", json!("brown")), ("scar", json!(true))]);
        let appearance = race(&[("eyeColor", json!("brown"))]);
        let winner = base.clone();

        let diff = diff_dependent(&appearance, Some(&base), Some(&winner));
        assert_eq!(
            diff["scar"],
            PropertyChange {
                old: Some(json!(true)),
                new: None,
            }
        );
        let merged = apply_diff(Some(&winner), &winner.key, &diff);
        assert!(merged.get("scar").is_none());
    }

    #[test]
    fn test_missing_base_treats_all_properties_as_changes() {
        let appearance = race(&[("eyeColor", json!("blue")), ("height", json!(1.0))]);
        let winner = race(&[("height", json!(1.0))]);

        let diff = diff_dependent(&appearance, None, Some(&winner));
        assert_eq!(diff.len(), 1);
        assert!(diff.contains_key("eyeColor"));
    }

    #[test]
    fn test_missing_winner_builds_from_appearance() {
        let appearance = race(&[("eyeColor", json!("blue"))]);
        let diff = diff_dependent(&appearance, None, None);
        let merged = apply_diff(None, &appearance.key, &diff);
        assert_eq!(merged, appearance);
    }

    #[test]
    fn test_merge_shared_conflict_last_processed_wins() {
        let dependent = FormKey::new(0x13746, "Skyrim.esm");
        let winner = race(&[("eyeColor", json!("brown"))]);
        let first = CharacterKey::new(1, "Skyrim.esm");
        let second = CharacterKey::new(2, "Skyrim.esm");
        let diff_first: DependentRecordDiff = [(
            "eyeColor".to_string(),
            PropertyChange {
                old: Some(json!("brown")),
                new: Some(json!("blue")),
            },
        )]
        .into_iter()
        .collect();
        let diff_second: DependentRecordDiff = [(
            "eyeColor".to_string(),
            PropertyChange {
                old: Some(json!("brown")),
                new: Some(json!("red")),
            },
        )]
        .into_iter()
        .collect();
        let contributions = vec![(&first, &diff_first), (&second, &diff_second)];

        let mut conflicts = Vec::new();
        let merged = merge_shared(
            &dependent,
            Some(&winner),
            &contributions,
            TieBreak::LastProcessedWins,
            &mut conflicts,
        );
        assert_eq!(merged.get("eyeColor"), Some(&json!("red")));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].property, "eyeColor");
        assert_eq!(conflicts[0].contributions.len(), 2);
        assert_eq!(conflicts[0].resolved, Some(json!("red")));

        let mut conflicts = Vec::new();
        let merged = merge_shared(
            &dependent,
            Some(&winner),
            &contributions,
            TieBreak::KeepLoadOrderWinner,
            &mut conflicts,
        );
        assert_eq!(merged.get("eyeColor"), Some(&json!("brown")));
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].tie_break, TieBreak::KeepLoadOrderWinner);
    }

    #[test]
    fn test_merge_shared_agreeing_edits_do_not_conflict() {
        let dependent = FormKey::new(0x13746, "Skyrim.esm");
        let winner = race(&[("eyeColor", json!("brown"))]);
        let a = CharacterKey::new(1, "Skyrim.esm");
        let b = CharacterKey::new(2, "Skyrim.esm");
        let diff: DependentRecordDiff = [(
            "eyeColor".to_string(),
            PropertyChange {
                old: Some(json!("brown")),
                new: Some(json!("blue")),
            },
        )]
        .into_iter()
        .collect();

        let mut conflicts = Vec::new();
        let merged = merge_shared(
            &dependent,
            Some(&winner),
            &[(&a, &diff), (&b, &diff)],
            TieBreak::LastProcessedWins,
            &mut conflicts,
        );
        assert!(conflicts.is_empty());
        assert_eq!(merged.get("eyeColor"), Some(&json!("blue")));
    }
}
