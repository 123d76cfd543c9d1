//! The set of known packages with their resolved indexes.

use crate::model::PackageId;
use crate::package::Package;
use crate::resolver::PackageIndex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A package paired with its [`PackageIndex`].
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub package: Package,
    pub index: Arc<PackageIndex>,
}

/// Every package a pass may consult: the active load order plus any package
/// only used as an appearance source. Read-only while workers run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<PackageId, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: Package, index: Arc<PackageIndex>) {
        self.entries
            .insert(package.id().clone(), CatalogEntry { package, index });
    }

    pub fn get(&self, id: &PackageId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn index(&self, id: &PackageId) -> Option<&PackageIndex> {
        self.entries.get(id).map(|e| e.index.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
