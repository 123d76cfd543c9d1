//! Path helpers shared by the content source, snapshotting and screening.

use crate::model::FormKey;
use camino::{Utf8Path, Utf8PathBuf};

/// File extensions recognised as plugin files.
pub const PLUGIN_EXTENSIONS: [&str; 3] = ["esp", "esm", "esl"];

/// File extensions recognised as asset archives.
pub const ARCHIVE_EXTENSIONS: [&str; 2] = ["bsa", "ba2"];

/// Normalize a relative path for comparisons: forward slashes, no leading
/// `./` or `/`, ASCII lowercase.
pub fn normalize_rel_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let trimmed = replaced.trim_start_matches("./").trim_start_matches('/');
    trimmed.to_ascii_lowercase()
}

/// Returns `true` if `name` has one of `extensions` (case-insensitive).
pub fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Utf8Path::new(name)
        .extension()
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Locate `relative` under `root`, matching every path component
/// case-insensitively. Returns the on-disk path when it exists.
pub fn find_case_insensitive(root: &Utf8Path, relative: &str) -> Option<Utf8PathBuf> {
    let normalized = relative.replace('\\', "/");
    let exact = root.join(&normalized);
    if exact.as_std_path().exists() {
        return Some(exact);
    }

    let mut current = root.to_path_buf();
    for component in normalized.split('/').filter(|c| !c.is_empty() && *c != ".") {
        let entries = std::fs::read_dir(current.as_std_path()).ok()?;
        let matched = entries.flatten().find_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            name.eq_ignore_ascii_case(component)
                .then(|| current.join(name))
        })?;
        current = matched;
    }
    Some(current)
}

/// FaceGen head mesh for an NPC, relative to a layer root.
pub fn facegen_mesh_path(key: &FormKey) -> String {
    format!(
        "meshes/actors/character/facegendata/facegeom/{}/{:08X}.nif",
        key.origin(),
        key.local_id()
    )
}

/// FaceGen tint texture for an NPC, relative to a layer root.
pub fn facegen_tint_path(key: &FormKey) -> String {
    format!(
        "textures/actors/character/facegendata/facetint/{}/{:08X}.dds",
        key.origin(),
        key.local_id()
    )
}

/// Asset files an NPC needs for its appearance to be usable.
pub fn required_asset_paths(key: &FormKey) -> [String; 2] {
    [facegen_mesh_path(key), facegen_tint_path(key)]
}
