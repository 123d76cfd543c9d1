//! Package snapshots for change detection.
//!
//! A [`PackageSnapshot`] summarizes what a package looks like on disk: its
//! plugin and archive files (name, size, modification time) and a summary of
//! every top-level asset directory (file count, newest modification time).
//! When a package's snapshot is unchanged since the previous pass, its
//! [`PackageIndex`] is reused instead of re-reading every record.
//!
//! Snapshot equality is order-independent and compares names case-insensitively;
//! see the `PartialEq` impl.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::PackageId;
use crate::package::Package;
use crate::resolver::PackageIndex;
use crate::utils::{has_extension, ARCHIVE_EXTENSIONS, PLUGIN_EXTENSIONS};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_64;

/// Current persisted cache schema.
const CACHE_VERSION: u32 = 1;

/// A plugin or archive file in a layer root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub layer: usize,
    pub name: String,
    pub size: u64,
    /// Modification time, seconds since the UNIX epoch.
    pub modified: u64,
}

/// Summary of one top-level directory in a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub layer: usize,
    pub path: String,
    /// Number of files anywhere below the directory.
    pub file_count: u64,
    /// Newest modification time of the directory or anything below it.
    pub modified: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSnapshot {
    pub package: PackageId,
    pub plugins: Vec<FileEntry>,
    pub archives: Vec<FileEntry>,
    pub directories: Vec<DirectoryEntry>,
    /// Layers whose folder was missing or unreadable while scanning.
    #[serde(default)]
    pub missing_layers: Vec<usize>,
}

type FileKey = (usize, String, u64, u64);

fn file_keys(entries: &[FileEntry]) -> Vec<FileKey> {
    let mut keys: Vec<FileKey> = entries
        .iter()
        .map(|e| (e.layer, e.name.to_lowercase(), e.size, e.modified))
        .collect();
    keys.sort_unstable();
    keys
}

fn directory_keys(entries: &[DirectoryEntry]) -> Vec<FileKey> {
    let mut keys: Vec<FileKey> = entries
        .iter()
        .map(|e| {
            (
                e.layer,
                e.path.replace('\\', "/").to_lowercase(),
                e.file_count,
                e.modified,
            )
        })
        .collect();
    keys.sort_unstable();
    keys
}

/// Two snapshots are equal when every entry of one has a matching entry in the
/// other: same layer, same name/path ignoring case, same size/count and
/// timestamp. Enumeration order does not matter. The package id and the
/// missing-layer list are not compared.
impl PartialEq for PackageSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.plugins.len() == other.plugins.len()
            && self.archives.len() == other.archives.len()
            && self.directories.len() == other.directories.len()
            && file_keys(&self.plugins) == file_keys(&other.plugins)
            && file_keys(&self.archives) == file_keys(&other.archives)
            && directory_keys(&self.directories) == directory_keys(&other.directories)
    }
}

impl PackageSnapshot {
    pub fn empty(package: PackageId) -> Self {
        Self {
            package,
            plugins: Vec::new(),
            archives: Vec::new(),
            directories: Vec::new(),
            missing_layers: Vec::new(),
        }
    }

    /// Total number of entries across all lists.
    pub fn len(&self) -> usize {
        self.plugins.len() + self.archives.len() + self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// xxHash3 digest of the normalized entries. Equal snapshots have equal
    /// fingerprints.
    pub fn fingerprint(&self) -> u64 {
        let mut input = Vec::new();
        for (tag, keys) in [
            (b'p', file_keys(&self.plugins)),
            (b'a', file_keys(&self.archives)),
            (b'd', directory_keys(&self.directories)),
        ] {
            input.push(tag);
            for (layer, name, size, modified) in keys {
                input.extend_from_slice(&(layer as u64).to_le_bytes());
                input.extend_from_slice(name.as_bytes());
                input.push(0);
                input.extend_from_slice(&size.to_le_bytes());
                input.extend_from_slice(&modified.to_le_bytes());
            }
        }
        xxh3_64(&input)
    }
}

fn modified_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Recursively count files below `dir` and find the newest modification time.
/// Unreadable entries are skipped.
fn summarize_directory(dir: &Utf8Path) -> (u64, u64) {
    let mut file_count = 0;
    let mut newest = std::fs::metadata(dir.as_std_path())
        .map(|m| modified_secs(&m))
        .unwrap_or(0);

    for entry in WalkDir::new(dir.as_std_path()).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", dir, e);
                continue;
            }
        };
        if let Ok(metadata) = entry.metadata() {
            newest = newest.max(modified_secs(&metadata));
        }
        if entry.file_type().is_file() {
            file_count += 1;
        }
    }

    (file_count, newest)
}

/// Scan every layer of `package` and build its snapshot.
///
/// A missing or unreadable layer contributes no entries and is listed in
/// [`PackageSnapshot::missing_layers`]. The token is checked before each layer.
pub fn compute_snapshot(package: &Package, cancel: &CancelToken) -> Result<PackageSnapshot> {
    let mut snapshot = PackageSnapshot::empty(package.id().clone());

    for (layer_idx, layer) in package.layers().iter().enumerate() {
        cancel.check()?;

        let entries = match std::fs::read_dir(layer.as_std_path()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    "Package={} layer {} unreadable ({}): {}",
                    package.id(),
                    layer_idx,
                    layer,
                    e
                );
                snapshot.missing_layers.push(layer_idx);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = match Utf8PathBuf::from_path_buf(entry.path()) {
                Ok(p) => p,
                Err(p) => {
                    tracing::warn!("Skipping non-UTF-8 path: {}", p.display());
                    continue;
                }
            };
            let Some(name) = path.file_name().map(str::to_string) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };

            if metadata.is_dir() {
                let (file_count, modified) = summarize_directory(&path);
                snapshot.directories.push(DirectoryEntry {
                    layer: layer_idx,
                    path: name,
                    file_count,
                    modified,
                });
                continue;
            }

            let file = FileEntry {
                layer: layer_idx,
                name,
                size: metadata.len(),
                modified: modified_secs(&metadata),
            };
            if has_extension(&file.name, &PLUGIN_EXTENSIONS) {
                snapshot.plugins.push(file);
            } else if has_extension(&file.name, &ARCHIVE_EXTENSIONS) {
                snapshot.archives.push(file);
            }
        }
    }

    tracing::debug!(
        "Snapshot package={} plugins={} archives={} dirs={} missing_layers={:?} fingerprint={:016x}",
        package.id(),
        snapshot.plugins.len(),
        snapshot.archives.len(),
        snapshot.directories.len(),
        snapshot.missing_layers,
        snapshot.fingerprint()
    );

    Ok(snapshot)
}

/// Whether `package` still matches `previous`.
pub fn is_unchanged(
    previous: &PackageSnapshot,
    package: &Package,
    cancel: &CancelToken,
) -> Result<bool> {
    Ok(compute_snapshot(package, cancel)? == *previous)
}

/// Cached state for one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub snapshot: PackageSnapshot,
    pub index: Arc<PackageIndex>,
}

impl CacheEntry {
    /// The cached index may be reused for `snapshot` when nothing changed and
    /// no layer was missing in either scan.
    pub fn reusable_for(&self, snapshot: &PackageSnapshot) -> bool {
        self.snapshot.missing_layers.is_empty()
            && snapshot.missing_layers.is_empty()
            && self.snapshot == *snapshot
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedCache {
    version: u32,
    written_at: u64,
    entries: Vec<CacheEntry>,
}

/// Per-package snapshot and index memo.
///
/// Written only by the pass coordinator, after a pass has completed; workers
/// never see it.
#[derive(Debug, Default, Clone)]
pub struct SnapshotCache {
    entries: HashMap<PackageId, CacheEntry>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, package: &PackageId) -> Option<&CacheEntry> {
        self.entries.get(package)
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.snapshot.package.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a persisted cache. Returns an empty cache if the file doesn't
    /// exist or was written by another schema version.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.as_std_path().exists() {
            return Ok(Self::new());
        }

        let bytes = std::fs::read(path.as_std_path())?;
        let persisted: PersistedCache = rmp_serde::from_slice(&bytes)?;
        if persisted.version != CACHE_VERSION {
            tracing::info!(
                "Snapshot cache version {} != {}; starting empty",
                persisted.version,
                CACHE_VERSION
            );
            return Ok(Self::new());
        }

        let mut cache = Self::new();
        for entry in persisted.entries {
            cache.insert(entry);
        }
        tracing::info!("Loaded snapshot cache with {} package(s) from {}", cache.len(), path);
        Ok(cache)
    }

    /// Persist the cache, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }

        let mut entries: Vec<CacheEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.snapshot.package.cmp(&b.snapshot.package));
        let persisted = PersistedCache {
            version: CACHE_VERSION,
            written_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            entries,
        };
        std::fs::write(path.as_std_path(), rmp_serde::to_vec_named(&persisted)?)?;
        Ok(())
    }
}
