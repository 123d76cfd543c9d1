//! NPC appearance resolution and patch generation.
//!
//! Given a set of installed packages, an active load order and a per-character
//! appearance selection, this crate decides which override wins for every NPC,
//! checks that each selection is usable, keeps the shared race records the
//! characters depend on consistent, and assembles a patch. It supports:
//!
//! - **Layered packages**: within a package the last layer wins
//! - **Load-order resolution**: across packages the last active package wins
//! - **Screening**: a selection is valid with a record override or FaceGen assets
//! - **Dependency forwarding**: race edits from the appearance package are
//!   applied onto the load-order winning race, with explicit conflict handling
//! - **Incremental passes**: unchanged packages reuse their cached index
//! - **Cancellation**: an abandoned pass never replaces the previous output
//!
//! The four stages ([`resolve`], [`screen_all`], [`forward_dependencies`] and
//! [`write_patch`]) are independently callable; [`AppearanceEngine`] chains
//! them for normal use.
//!
//! # Example
//!
//! ```no_run
//! use npc_patcher::{
//!     discover_packages, AppearanceEngine, CancelToken, EngineConfig, FsContentSource,
//!     PassInput, PackageId,
//! };
//! use camino::Utf8Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let packages = discover_packages(Utf8Path::new("packages"))?;
//! let input = PassInput {
//!     load_order: packages.iter().map(|p| p.id().clone()).collect::<Vec<PackageId>>(),
//!     packages,
//!     selections: Default::default(),
//! };
//!
//! let engine = AppearanceEngine::new(Arc::new(FsContentSource::new()), EngineConfig::default())
//!     .with_progress(|progress| println!("{:?}", progress.stage));
//!
//! let report = engine.run_full_pass(&input, &CancelToken::new())?;
//! report.output.artifact.save(Utf8Path::new("out/patch.json"))?;
//! println!("{} unresolved", report.output.unresolved.len());
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod catalog;
pub mod content;
pub mod error;
pub mod forwarding;
pub mod model;
pub mod package;
pub mod pass;
pub mod resolver;
pub mod screening;
pub mod snapshot;
pub mod utils;
pub mod writer;

// Re-export main types
pub use cancel::CancelToken;
pub use catalog::{Catalog, CatalogEntry};
pub use content::{ContentSource, FsContentSource, MemoryContentSource};
pub use error::{Error, Result};
pub use forwarding::{
    apply_diff, diff_dependent, forward_dependencies, CharacterForwarding, DependentConflict,
    DependentRecordDiff, ForwardingConfig, ForwardingReport, PropertyChange,
};
pub use model::{CharacterKey, FormKey, OverrideRecord, PackageId, Properties, Record, RecordKind};
pub use package::{discover_packages, Package};
pub use pass::{
    AppearanceEngine, CancelledPass, EngineConfig, PassInput, PassProgress, PassReport, PassStage,
};
pub use resolver::{
    base_state_for, index_package, resolve, resolve_dependents, PackageIndex, WinningMap,
    WinningState,
};
pub use screening::{screen, screen_all, ScreeningResult, Selections, UnresolvedReason};
pub use snapshot::{compute_snapshot, is_unchanged, CacheEntry, PackageSnapshot, SnapshotCache};
pub use writer::{write_patch, PatchArtifact, PatchEntry, PatchOutput, UnresolvedCharacter};

pub use npc_package::{DependentInstanceMode, ForwardingPolicy, TieBreak};
