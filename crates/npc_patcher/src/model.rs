//! Record identities and payloads shared by every pipeline stage.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// Property bag carried by a record. Only the forwarding engine looks inside.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Property of an NPC record naming its dependent (race) record.
pub const RACE_PROPERTY: &str = "race";

/// Largest local id a plugin can assign (24 bits).
pub const MAX_LOCAL_ID: u32 = 0x00FF_FFFF;

/// Globally unique record identity: the plugin that introduced the record plus
/// its local id within that plugin.
///
/// Text form is `"0A1B2C:Skyrim.esm"`. Plugin file names are matched without
/// regard to ASCII case, so `000800:skyrim.esm` and `000800:Skyrim.esm` are the
/// same key; the casing first written is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormKey {
    origin: String,
    local_id: u32,
}

/// Key of an NPC record.
pub type CharacterKey = FormKey;

impl FormKey {
    pub fn new(local_id: u32, origin: impl Into<String>) -> Self {
        debug_assert!(local_id <= MAX_LOCAL_ID, "local id {local_id:#X} exceeds 24 bits");
        Self {
            origin: origin.into(),
            local_id,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Parse a local id written as one to six hex digits.
    pub fn parse_local_id(digits: &str) -> Option<u32> {
        if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(digits, 16).ok()
    }

    fn folded_origin(&self) -> impl Iterator<Item = u8> + '_ {
        self.origin.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for FormKey {
    fn eq(&self, other: &Self) -> bool {
        self.local_id == other.local_id && self.origin.eq_ignore_ascii_case(&other.origin)
    }
}

impl Eq for FormKey {}

impl Hash for FormKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.folded_origin() {
            state.write_u8(b);
        }
        state.write_u8(0xFF);
        self.local_id.hash(state);
    }
}

impl Ord for FormKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded_origin()
            .cmp(other.folded_origin())
            .then(self.local_id.cmp(&other.local_id))
    }
}

impl PartialOrd for FormKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FormKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}:{}", self.local_id, self.origin)
    }
}

impl FromStr for FormKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidFormKey(s.to_string());
        let (id, origin) = s.split_once(':').ok_or_else(invalid)?;
        if origin.trim().is_empty() {
            return Err(invalid());
        }
        let local_id = Self::parse_local_id(id).ok_or_else(invalid)?;
        Ok(Self::new(local_id, origin.trim()))
    }
}

impl TryFrom<String> for FormKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FormKey> for String {
    fn from(key: FormKey) -> Self {
        key.to_string()
    }
}

/// Record families the engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    /// A character record.
    Npc,
    /// The shared taxonomy record characters belong to.
    Race,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Npc, RecordKind::Race];

    /// Folder name used by the filesystem record layout.
    pub fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Npc => "npc",
            RecordKind::Race => "race",
        }
    }
}

/// Identifier of an installed package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One version of a record as some package layer defines it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: FormKey,
    pub kind: RecordKind,
    #[serde(default)]
    pub properties: Properties,
}

impl Record {
    pub fn new(key: FormKey, kind: RecordKind, properties: Properties) -> Self {
        Self {
            key,
            kind,
            properties,
        }
    }

    pub fn get(&self, property: &str) -> Option<&serde_json::Value> {
        self.properties.get(property)
    }

    /// The dependent record this NPC belongs to, if it names one.
    pub fn race(&self) -> Option<FormKey> {
        self.get(RACE_PROPERTY)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// A record together with where it came from.
///
/// Cheap to clone; the payload is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRecord {
    pub record: Arc<Record>,
    pub package: PackageId,
    /// Index of the layer inside `package` that supplied the record.
    pub layer: usize,
}

impl OverrideRecord {
    pub fn key(&self) -> &FormKey {
        &self.record.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_form_key_round_trip_text() {
        let key: FormKey = "0A1B2C:Skyrim.esm".parse().unwrap();
        assert_eq!(key.local_id(), 0x0A1B2C);
        assert_eq!(key.origin(), "Skyrim.esm");
        assert_eq!(key.to_string(), "0A1B2C:Skyrim.esm");
    }

    #[test]
    fn test_form_key_pads_display() {
        let key = FormKey::new(0x800, "Dawnguard.esm");
        assert_eq!(key.to_string(), "000800:Dawnguard.esm");
    }

    #[test]
    fn test_form_key_rejects_garbage() {
        assert!("Skyrim.esm".parse::<FormKey>().is_err());
        assert!(":Skyrim.esm".parse::<FormKey>().is_err());
        assert!("XYZ:Skyrim.esm".parse::<FormKey>().is_err());
        assert!("000800:".parse::<FormKey>().is_err());
        assert!("123456789:Skyrim.esm".parse::<FormKey>().is_err());
        assert!("1000000:Skyrim.esm".parse::<FormKey>().is_err());
        assert!("+800:Skyrim.esm".parse::<FormKey>().is_err());
        assert!("-800:Skyrim.esm".parse::<FormKey>().is_err());
        assert_eq!(
            "FFFFFF:Skyrim.esm".parse::<FormKey>().unwrap().local_id(),
            MAX_LOCAL_ID
        );
    }

    #[test]
    fn test_form_key_origin_ignores_case() {
        use std::collections::{BTreeMap, HashSet};

        let written: FormKey = "000800:Skyrim.esm".parse().unwrap();
        let selected: FormKey = "000800:skyrim.ESM".parse().unwrap();
        assert_eq!(written, selected);
        assert_eq!(written.cmp(&selected), Ordering::Equal);
        assert_ne!(written, FormKey::new(0x801, "skyrim.esm"));

        let set: HashSet<FormKey> = [written.clone(), selected.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);

        let mut map = BTreeMap::new();
        map.insert(written, "base");
        assert_eq!(map.get(&selected), Some(&"base"));
        // Display keeps the casing it was created with.
        assert_eq!(selected.to_string(), "000800:skyrim.ESM");
    }

    #[test]
    fn test_form_key_serializes_as_string() {
        let key = FormKey::new(0x13BBF, "Skyrim.esm");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"013BBF:Skyrim.esm\"");

        let parsed: FormKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_record_race_reference() {
        let mut properties = Properties::new();
        properties.insert(RACE_PROPERTY.to_string(), json!("013746:Skyrim.esm"));
        let record = Record::new(FormKey::new(1, "Mod.esp"), RecordKind::Npc, properties);

        assert_eq!(record.race(), Some(FormKey::new(0x13746, "Skyrim.esm")));
    }

    #[test]
    fn test_record_without_race() {
        let record = Record::new(FormKey::new(1, "Mod.esp"), RecordKind::Npc, Properties::new());
        assert_eq!(record.race(), None);
    }
}
