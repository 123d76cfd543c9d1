//! Record and asset access abstraction.
//!
//! Reading binary plugin formats is not this crate's concern. The engine sees
//! package content only through [`ContentSource`], one layer folder at a time:
//!
//! - enumerate the record keys a layer defines,
//! - load one record by key,
//! - check whether an auxiliary asset file exists.
//!
//! The crate ships [`FsContentSource`], which reads records exported as JSON
//! files, and [`MemoryContentSource`] for callers that already hold records in
//! memory (and for tests).

use crate::error::{Error, Result};
use crate::model::{FormKey, Properties, Record, RecordKind};
use crate::utils::{find_case_insensitive, normalize_rel_path};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Abstracts how package layers expose records and assets.
///
/// Implementations must be [`Send`] + [`Sync`]: screening checks assets from
/// worker threads.
pub trait ContentSource: Send + Sync {
    /// Whether the layer folder can be read at all. Unavailable layers
    /// contribute nothing and mark their package as degraded.
    fn layer_available(&self, layer: &Utf8Path) -> bool;

    /// Keys of every `kind` record the layer defines.
    fn enumerate_keys(&self, layer: &Utf8Path, kind: RecordKind) -> Result<Vec<FormKey>>;

    /// Load one record from the layer, `None` if the layer does not define it.
    fn load_record(
        &self,
        layer: &Utf8Path,
        kind: RecordKind,
        key: &FormKey,
    ) -> Result<Option<Record>>;

    /// Whether `relative_path` exists in the layer (case-insensitive).
    fn asset_exists(&self, layer: &Utf8Path, relative_path: &str) -> bool;

    /// Load every `kind` record the layer defines.
    fn load_layer(&self, layer: &Utf8Path, kind: RecordKind) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for key in self.enumerate_keys(layer, kind)? {
            if let Some(record) = self.load_record(layer, kind, &key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Filesystem-backed content source.
///
/// Records are exported one JSON object (the property map) per file:
///
/// ```text
/// layer/
///   MyMod.esp                                   # plugin (snapshot only)
///   MyMod.bsa                                   # archive (snapshot only)
///   records/
///     npc/
///       Skyrim.esm/
///         013BBF.json                           # { "race": "013746:Skyrim.esm", ... }
///     race/
///       Skyrim.esm/
///         013746.json
///   meshes/actors/character/facegendata/facegeom/Skyrim.esm/00013BBF.nif
///   textures/actors/character/facegendata/facetint/Skyrim.esm/00013BBF.dds
/// ```
///
/// Record file stems are exactly six hex digits; other files are ignored.
#[derive(Debug, Default, Clone)]
pub struct FsContentSource;

impl FsContentSource {
    pub fn new() -> Self {
        Self
    }

    fn kind_dir(layer: &Utf8Path, kind: RecordKind) -> Utf8PathBuf {
        layer.join("records").join(kind.dir_name())
    }
}

/// Record files are named with exactly six hex digits (`000800.json`).
fn parse_record_stem(stem: &str) -> Option<u32> {
    if stem.len() != 6 {
        return None;
    }
    FormKey::parse_local_id(stem)
}

impl ContentSource for FsContentSource {
    fn layer_available(&self, layer: &Utf8Path) -> bool {
        layer.as_std_path().is_dir()
    }

    fn enumerate_keys(&self, layer: &Utf8Path, kind: RecordKind) -> Result<Vec<FormKey>> {
        let kind_dir = Self::kind_dir(layer, kind);
        if !kind_dir.as_std_path().is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for origin_entry in std::fs::read_dir(kind_dir.as_std_path())? {
            let origin_entry = origin_entry?;
            let origin_path = origin_entry.path();
            if !origin_path.is_dir() {
                continue;
            }
            let Some(origin) = origin_path.file_name().and_then(|s| s.to_str()) else {
                tracing::warn!("Skipping non-UTF-8 path: {}", origin_path.display());
                continue;
            };

            for entry in std::fs::read_dir(&origin_path)? {
                let path = entry?.path();
                let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some(stem) = name
                    .strip_suffix(".json")
                    .or_else(|| name.strip_suffix(".JSON"))
                else {
                    continue;
                };
                match parse_record_stem(stem) {
                    Some(local_id) => keys.push(FormKey::new(local_id, origin)),
                    None => tracing::debug!("Ignoring non-record file {}", path.display()),
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn load_record(
        &self,
        layer: &Utf8Path,
        kind: RecordKind,
        key: &FormKey,
    ) -> Result<Option<Record>> {
        let relative = format!(
            "records/{}/{}/{:06X}.json",
            kind.dir_name(),
            key.origin(),
            key.local_id()
        );
        let Some(path) = find_case_insensitive(layer, &relative) else {
            return Ok(None);
        };

        let contents = std::fs::read_to_string(path.as_std_path())?;
        let value: serde_json::Value = serde_json::from_str(&contents)?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::MalformedRecord {
                path,
                reason: "expected a JSON object of properties".to_string(),
            });
        };
        let properties: Properties = map.into_iter().collect();
        Ok(Some(Record::new(key.clone(), kind, properties)))
    }

    fn asset_exists(&self, layer: &Utf8Path, relative_path: &str) -> bool {
        find_case_insensitive(layer, relative_path)
            .map(|p| p.as_std_path().is_file())
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryLayer {
    records: BTreeMap<(RecordKind, FormKey), Record>,
    assets: HashSet<String>,
}

/// In-memory content source keyed by layer path.
///
/// Layers that were never touched through the builder methods report as
/// unavailable.
#[derive(Debug, Default, Clone)]
pub struct MemoryContentSource {
    layers: HashMap<Utf8PathBuf, MemoryLayer>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an (initially empty) layer.
    pub fn add_layer(&mut self, layer: impl Into<Utf8PathBuf>) -> &mut Self {
        self.layers.entry(layer.into()).or_default();
        self
    }

    pub fn insert_record(&mut self, layer: impl Into<Utf8PathBuf>, record: Record) -> &mut Self {
        self.layers
            .entry(layer.into())
            .or_default()
            .records
            .insert((record.kind, record.key.clone()), record);
        self
    }

    pub fn insert_asset(&mut self, layer: impl Into<Utf8PathBuf>, relative_path: &str) -> &mut Self {
        self.layers
            .entry(layer.into())
            .or_default()
            .assets
            .insert(normalize_rel_path(relative_path));
        self
    }

    /// Insert every asset an NPC requires.
    pub fn insert_facegen(&mut self, layer: impl Into<Utf8PathBuf>, key: &FormKey) -> &mut Self {
        let layer = layer.into();
        for path in crate::utils::required_asset_paths(key) {
            self.insert_asset(layer.clone(), &path);
        }
        self
    }

    /// Forget a layer, as if its folder had been removed.
    pub fn remove_layer(&mut self, layer: &Utf8Path) -> &mut Self {
        self.layers.remove(layer);
        self
    }
}

impl ContentSource for MemoryContentSource {
    fn layer_available(&self, layer: &Utf8Path) -> bool {
        self.layers.contains_key(layer)
    }

    fn enumerate_keys(&self, layer: &Utf8Path, kind: RecordKind) -> Result<Vec<FormKey>> {
        Ok(self
            .layers
            .get(layer)
            .map(|l| {
                l.records
                    .keys()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, key)| key.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn load_record(
        &self,
        layer: &Utf8Path,
        kind: RecordKind,
        key: &FormKey,
    ) -> Result<Option<Record>> {
        Ok(self
            .layers
            .get(layer)
            .and_then(|l| l.records.get(&(kind, key.clone())))
            .cloned())
    }

    fn asset_exists(&self, layer: &Utf8Path, relative_path: &str) -> bool {
        self.layers
            .get(layer)
            .map(|l| l.assets.contains(&normalize_rel_path(relative_path)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::facegen_mesh_path;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_layer() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempdir().unwrap();
        let layer = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let npc_dir = layer.join("records/npc/Skyrim.esm");
        fs::create_dir_all(&npc_dir).unwrap();
        fs::write(
            npc_dir.join("013BBF.json"),
            r#"{ "race": "013746:Skyrim.esm", "hairColor": "red" }"#,
        )
        .unwrap();
        fs::write(npc_dir.join("notes.txt"), b"ignored").unwrap();
        fs::write(npc_dir.join("12.json"), b"{}").unwrap();

        let race_dir = layer.join("records/race/Skyrim.esm");
        fs::create_dir_all(&race_dir).unwrap();
        fs::write(race_dir.join("013746.json"), r#"{ "eyeColor": "blue" }"#).unwrap();

        (dir, layer)
    }

    #[test]
    fn test_fs_enumerate_keys() {
        let (_dir, layer) = create_test_layer();
        let source = FsContentSource::new();

        let npcs = source.enumerate_keys(&layer, RecordKind::Npc).unwrap();
        assert_eq!(npcs, vec![FormKey::new(0x13BBF, "Skyrim.esm")]);

        let races = source.enumerate_keys(&layer, RecordKind::Race).unwrap();
        assert_eq!(races, vec![FormKey::new(0x13746, "Skyrim.esm")]);
    }

    #[test]
    fn test_fs_enumerate_missing_records_dir() {
        let dir = tempdir().unwrap();
        let layer = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = FsContentSource::new();

        assert!(source.layer_available(&layer));
        assert!(source
            .enumerate_keys(&layer, RecordKind::Npc)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fs_load_record() {
        let (_dir, layer) = create_test_layer();
        let source = FsContentSource::new();
        let key = FormKey::new(0x13BBF, "Skyrim.esm");

        let record = source
            .load_record(&layer, RecordKind::Npc, &key)
            .unwrap()
            .unwrap();
        assert_eq!(record.race(), Some(FormKey::new(0x13746, "Skyrim.esm")));
        assert_eq!(record.get("hairColor"), Some(&serde_json::json!("red")));

        let missing = source
            .load_record(&layer, RecordKind::Npc, &FormKey::new(1, "Skyrim.esm"))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_fs_load_record_rejects_non_object() {
        let (_dir, layer) = create_test_layer();
        fs::write(layer.join("records/npc/Skyrim.esm/000001.json"), b"[1, 2]").unwrap();
        let source = FsContentSource::new();

        let result = source.load_record(&layer, RecordKind::Npc, &FormKey::new(1, "Skyrim.esm"));
        assert!(matches!(result, Err(Error::MalformedRecord { .. })));
    }

    #[test]
    fn test_fs_asset_exists_case_insensitive() {
        let (_dir, layer) = create_test_layer();
        let key = FormKey::new(0x13BBF, "Skyrim.esm");
        let on_disk = layer.join("Meshes/Actors/Character/FaceGenData/FaceGeom/skyrim.esm");
        fs::create_dir_all(&on_disk).unwrap();
        fs::write(on_disk.join("00013bbf.NIF"), b"nif").unwrap();

        let source = FsContentSource::new();
        assert!(source.asset_exists(&layer, &facegen_mesh_path(&key)));
        assert!(!source.asset_exists(&layer, "meshes/missing.nif"));
    }

    #[test]
    fn test_memory_source_layers() {
        let key = FormKey::new(0x800, "Mod.esp");
        let mut source = MemoryContentSource::new();
        source
            .insert_record("/a", Record::new(key.clone(), RecordKind::Npc, Properties::new()))
            .insert_facegen("/a", &key)
            .add_layer("/b");

        assert!(source.layer_available(Utf8Path::new("/a")));
        assert!(source.layer_available(Utf8Path::new("/b")));
        assert!(!source.layer_available(Utf8Path::new("/c")));
        assert_eq!(
            source.load_layer(Utf8Path::new("/a"), RecordKind::Npc).unwrap().len(),
            1
        );
        assert!(source.asset_exists(Utf8Path::new("/a"), &facegen_mesh_path(&key).to_uppercase()));

        source.remove_layer(Utf8Path::new("/a"));
        assert!(!source.layer_available(Utf8Path::new("/a")));
    }
}
