//! Package manifests and pass profiles.
//!
//! A package is an installed content unit made of one or more folder layers.
//! Its root may carry a `package.json` or `package.toml` manifest describing
//! those layers; without one the root folder itself is the only layer.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod profile;

pub use profile::{DependentInstanceMode, ForwardingPolicy, Profile, TieBreak};

pub const JSON_MANIFEST_NAME: &str = "package.json";
pub const TOML_MANIFEST_NAME: &str = "package.toml";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid package manifest in {path}: {reason}")]
    InvalidManifest { path: Utf8PathBuf, reason: String },
}

/// Describes a package manifest file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct PackageManifest {
    /// Stable identifier used by load orders and selections.
    /// Derived from `name` when omitted.
    ///
    /// Example: `high-poly-heads`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name of the package.
    ///
    /// Example: `High Poly Heads`
    pub name: String,

    /// Layers of the package, base first.
    /// Later layers override same-named files of earlier layers within this package.
    /// If not specified, the package root is the single base layer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerDefinition>,
}

/// One folder layer of a package.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct LayerDefinition {
    /// Folder path relative to the package root.
    ///
    /// Example: `.`, `patches/2k-textures`
    pub path: Utf8PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LayerDefinition {
    /// Returns the default base layer (the package root).
    pub fn base() -> Self {
        Self {
            path: Utf8PathBuf::from("."),
            description: Some("Base layer of the package".to_string()),
        }
    }
}

impl PackageManifest {
    /// Manifest used for a package folder without a manifest file.
    pub fn implicit(root: &Utf8Path) -> Self {
        Self {
            id: None,
            name: root.file_name().unwrap_or(root.as_str()).to_string(),
            layers: Vec::new(),
        }
    }

    /// Load the manifest from `root`, trying `package.json` first, then `package.toml`.
    ///
    /// Returns an implicit single-layer manifest when neither file exists.
    pub fn load(root: &Utf8Path) -> Result<Self> {
        let json_path = root.join(JSON_MANIFEST_NAME);
        if json_path.as_std_path().is_file() {
            let contents = std::fs::read_to_string(json_path.as_std_path())?;
            let manifest: Self = serde_json::from_str(&contents)?;
            return manifest.validated(&json_path);
        }

        let toml_path = root.join(TOML_MANIFEST_NAME);
        if toml_path.as_std_path().is_file() {
            let contents = std::fs::read_to_string(toml_path.as_std_path())?;
            let manifest: Self = toml::from_str(&contents)?;
            return manifest.validated(&toml_path);
        }

        Ok(Self::implicit(root))
    }

    fn validated(self, path: &Utf8Path) -> Result<Self> {
        if self.name.trim().is_empty() && self.id.is_none() {
            return Err(Error::InvalidManifest {
                path: path.to_path_buf(),
                reason: "either `name` or `id` must be set".to_string(),
            });
        }
        if let Some(layer) = self.layers.iter().find(|l| l.path.is_absolute()) {
            return Err(Error::InvalidManifest {
                path: path.to_path_buf(),
                reason: format!("layer path '{}' must be relative", layer.path),
            });
        }
        Ok(self)
    }

    /// The package identifier: the explicit `id`, or the slugified name.
    pub fn package_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => slug::slugify(&self.name),
        }
    }

    /// Absolute layer folders under `root`, base first. Never empty.
    pub fn layer_paths(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        if self.layers.is_empty() {
            return vec![root.to_path_buf()];
        }
        self.layers
            .iter()
            .map(|layer| {
                if layer.path.as_str() == "." {
                    root.to_path_buf()
                } else {
                    root.join(&layer.path)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn utf8_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_json_parsing() {
        let manifest: PackageManifest = serde_json::from_str(
            r#"
            {
                "name": "High Poly Heads",
                "layers": [
                    { "path": "." },
                    { "path": "patches/2k", "description": "2K textures" }
                ]
            }
            "#,
        )
        .unwrap();

        assert_eq!(manifest.id, None);
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(manifest.layers[1].description.as_deref(), Some("2K textures"));
    }

    #[test]
    fn test_toml_parsing() {
        let manifest: PackageManifest = toml::from_str(
            r#"
            id = "hph"
            name = "High Poly Heads"

            [[layers]]
            path = "."

            [[layers]]
            path = "overrides"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.package_id(), "hph");
        assert_eq!(manifest.layers[1].path, Utf8PathBuf::from("overrides"));
    }

    #[test]
    fn test_package_id_slugified() {
        let manifest = PackageManifest {
            id: None,
            name: "Bijin Warmaidens SE".to_string(),
            layers: vec![],
        };
        assert_eq!(manifest.package_id(), "bijin-warmaidens-se");
    }

    #[test]
    fn test_layer_paths_default_to_root() {
        let root = Utf8PathBuf::from("/packages/base");
        let manifest = PackageManifest::implicit(&root);

        assert_eq!(manifest.name, "base");
        assert_eq!(manifest.layer_paths(&root), vec![root.clone()]);
    }

    #[test]
    fn test_layer_paths_ordered() {
        let root = Utf8PathBuf::from("/packages/moda");
        let manifest = PackageManifest {
            id: None,
            name: "Mod A".to_string(),
            layers: vec![
                LayerDefinition::base(),
                LayerDefinition {
                    path: Utf8PathBuf::from("fixes"),
                    description: None,
                },
            ],
        };

        assert_eq!(
            manifest.layer_paths(&root),
            vec![root.clone(), root.join("fixes")]
        );
    }

    #[test]
    fn test_load_prefers_json() {
        let dir = tempdir().unwrap();
        let root = utf8_root(&dir);
        fs::write(root.join(JSON_MANIFEST_NAME), r#"{ "id": "from-json", "name": "A" }"#).unwrap();
        fs::write(root.join(TOML_MANIFEST_NAME), "id = \"from-toml\"\nname = \"A\"\n").unwrap();

        let manifest = PackageManifest::load(&root).unwrap();
        assert_eq!(manifest.package_id(), "from-json");
    }

    #[test]
    fn test_load_missing_manifest_is_implicit() {
        let dir = tempdir().unwrap();
        let root = utf8_root(&dir);

        let manifest = PackageManifest::load(&root).unwrap();
        assert!(manifest.layers.is_empty());
        assert_eq!(manifest.layer_paths(&root), vec![root]);
    }

    #[test]
    fn test_load_rejects_absolute_layer() {
        let dir = tempdir().unwrap();
        let root = utf8_root(&dir);
        let absolute = root.join("elsewhere");
        fs::write(
            root.join(JSON_MANIFEST_NAME),
            serde_json::json!({ "name": "A", "layers": [{ "path": absolute }] }).to_string(),
        )
        .unwrap();

        let result = PackageManifest::load(&root);
        assert!(matches!(result, Err(Error::InvalidManifest { .. })));
    }
}
