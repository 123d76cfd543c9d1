//! Installed packages and their ordered layers.
//!
//! Layer precedence is positional: index 0 is the base, and every later layer
//! overrides same-named content of the layers before it. The same rule,
//! "last wins", applies one level up across the active load order.

use crate::error::{Error, Result};
use crate::model::PackageId;
use camino::{Utf8Path, Utf8PathBuf};
use npc_package::PackageManifest;

/// One installed content package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    id: PackageId,
    name: String,
    layers: Vec<Utf8PathBuf>,
}

impl Package {
    /// Create a package. Fails with [`Error::EmptyPackage`] when `layers` is empty.
    pub fn new(
        id: impl Into<PackageId>,
        name: impl Into<String>,
        layers: Vec<Utf8PathBuf>,
    ) -> Result<Self> {
        let id = id.into();
        if layers.is_empty() {
            return Err(Error::EmptyPackage(id.to_string()));
        }
        Ok(Self {
            id,
            name: name.into(),
            layers,
        })
    }

    /// Build a package from the manifest found in `root` (or the implicit one).
    pub fn from_dir(root: &Utf8Path) -> Result<Self> {
        let manifest = PackageManifest::load(root)?;
        Self::new(
            manifest.package_id(),
            manifest.name.clone(),
            manifest.layer_paths(root),
        )
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer folders, base first.
    pub fn layers(&self) -> &[Utf8PathBuf] {
        &self.layers
    }

    /// Layer folders with their indices, last (highest precedence) first.
    pub fn layers_override_first(&self) -> impl Iterator<Item = (usize, &Utf8PathBuf)> {
        self.layers.iter().enumerate().rev()
    }
}

/// Load every package under `packages_dir` (one per immediate subfolder), sorted by id.
pub fn discover_packages(packages_dir: &Utf8Path) -> Result<Vec<Package>> {
    let mut packages = Vec::new();
    for entry in std::fs::read_dir(packages_dir.as_std_path())? {
        let entry = entry?;
        let path = match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(p) => p,
            Err(p) => {
                tracing::warn!("Skipping non-UTF-8 path: {}", p.display());
                continue;
            }
        };
        if !path.as_std_path().is_dir() {
            continue;
        }

        let package = Package::from_dir(&path)?;
        tracing::debug!(
            "Discovered package id={} layers={} root={}",
            package.id(),
            package.layers().len(),
            path
        );
        packages.push(package);
    }
    packages.sort_by(|a, b| a.id().cmp(b.id()));
    if let Some(pair) = packages.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
        return Err(Error::DuplicatePackageId(pair[0].id().to_string()));
    }
    Ok(packages)
}
