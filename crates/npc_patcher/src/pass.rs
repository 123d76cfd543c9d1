//! Full resolution pass orchestration.
//!
//! [`AppearanceEngine::run_full_pass`] runs the pipeline stages in order:
//!
//! 1. Validate the load order against the installed packages.
//! 2. Snapshot every package (sequential, cancellable between layers) and look
//!    each one up in the [`SnapshotCache`].
//! 3. Index packages whose snapshot changed, in parallel.
//! 4. Resolve character and dependent winners. If every active index was reused
//!    and the load order is unchanged, the previous winning maps are reused.
//! 5. Screen every character, forward dependent edits, assemble the patch.
//!
//! Stages 3 to 5 only read the catalog and winning maps, so each is a join
//! barrier for the next. Nothing produced by the pass is published until the
//! last stage finishes: cache entries are staged locally and committed together
//! with the report. A cancelled pass leaves [`current`](AppearanceEngine::current)
//! and the cache exactly as they were.

use crate::cancel::CancelToken;
use crate::catalog::Catalog;
use crate::content::ContentSource;
use crate::error::{Error, Result};
use crate::forwarding::{forward_dependencies, ForwardingConfig, ForwardingReport};
use crate::model::{PackageId, RecordKind};
use crate::package::Package;
use crate::resolver::{index_package, resolve, PackageIndex, WinningMap};
use crate::screening::{screen_all, ScreeningResult, Selections};
use crate::snapshot::{compute_snapshot, CacheEntry, PackageSnapshot, SnapshotCache};
use crate::writer::{write_patch, PatchOutput};
use camino::Utf8Path;
use npc_package::{DependentInstanceMode, ForwardingPolicy, Profile, TieBreak};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Caller-selected engine policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    pub forwarding: ForwardingPolicy,
    pub dependent_instances: DependentInstanceMode,
    pub tie_break: TieBreak,
    /// Run per-package and per-key work on the global rayon pool. When off,
    /// the pass runs on a single worker thread.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            forwarding: ForwardingPolicy::default(),
            dependent_instances: DependentInstanceMode::default(),
            tie_break: TieBreak::default(),
            parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            forwarding: profile.forwarding,
            dependent_instances: profile.dependent_instances,
            tie_break: profile.tie_break,
            parallel: profile.parallel,
        }
    }

    pub fn forwarding_config(&self) -> ForwardingConfig {
        ForwardingConfig {
            policy: self.forwarding,
            instances: self.dependent_instances,
            tie_break: self.tie_break,
        }
    }
}

/// Immutable inputs of one pass.
#[derive(Debug, Clone, Default)]
pub struct PassInput {
    /// Every installed package, active or not.
    pub packages: Vec<Package>,
    /// Active packages, lowest precedence first.
    pub load_order: Vec<PackageId>,
    pub selections: Selections,
}

/// Stages of a pass, emitted in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PassStage {
    Snapshotting,
    Indexing,
    Resolving,
    Screening,
    Forwarding,
    Writing,
    Complete,
}

/// Progress event. `current`/`total` count packages during
/// [`Indexing`](PassStage::Indexing) and characters afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassProgress {
    pub generation: u64,
    pub stage: PassStage,
    pub current: u32,
    pub total: u32,
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub generation: u64,
    pub output: PatchOutput,
    pub forwarding: ForwardingReport,
    pub screening: Vec<ScreeningResult>,
    /// Packages with at least one layer that contributed nothing.
    pub degraded_packages: Vec<PackageId>,
    /// Packages whose index came from the snapshot cache.
    pub reused_indexes: Vec<PackageId>,
    /// Whether the winning maps of the previous pass were reused.
    pub reused_resolution: bool,
    pub elapsed: Duration,
}

impl PassReport {
    /// Characters whose selection was screened in this pass.
    pub fn characters_processed(&self) -> usize {
        self.screening.len()
    }
}

/// Record of an abandoned pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledPass {
    pub generation: u64,
    /// Always zero: partial results are discarded.
    pub characters_processed: usize,
}

/// Winning maps of the last completed pass and what they were computed from.
#[derive(Debug)]
struct ResolutionMemo {
    load_order: Vec<PackageId>,
    fingerprints: Vec<u64>,
    npcs: Arc<WinningMap>,
    races: Arc<WinningMap>,
}

type ProgressCallback = Arc<dyn Fn(PassProgress) + Send + Sync>;

/// Runs resolution passes and holds the state shared between them.
///
/// The engine is `Sync`: a caller may start a new pass from another thread
/// after cancelling the one in flight. Only the cache, the resolution memo and
/// the current report are behind locks; everything a pass produces is
/// immutable once built.
pub struct AppearanceEngine {
    source: Arc<dyn ContentSource>,
    config: EngineConfig,
    progress_callback: Option<ProgressCallback>,
    generation: AtomicU64,
    cache: Mutex<SnapshotCache>,
    resolution: Mutex<Option<ResolutionMemo>>,
    current: RwLock<Option<Arc<PassReport>>>,
    last_cancelled: Mutex<Option<CancelledPass>>,
}

impl AppearanceEngine {
    pub fn new(source: Arc<dyn ContentSource>, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            progress_callback: None,
            generation: AtomicU64::new(0),
            cache: Mutex::new(SnapshotCache::new()),
            resolution: Mutex::new(None),
            current: RwLock::new(None),
            last_cancelled: Mutex::new(None),
        }
    }

    /// Register a progress callback. It is invoked between stages, never from
    /// inside a parallel stage.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(PassProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Start from a previously loaded cache.
    pub fn with_cache(self, cache: SnapshotCache) -> Self {
        Self {
            cache: Mutex::new(cache),
            ..self
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the in-memory cache with the one persisted at `path`.
    pub fn load_cache(&self, path: &Utf8Path) -> Result<()> {
        let loaded = SnapshotCache::load(path)?;
        *self.cache.lock().map_err(|_| Error::LockPoisoned)? = loaded;
        Ok(())
    }

    pub fn save_cache(&self, path: &Utf8Path) -> Result<()> {
        self.cache
            .lock()
            .map_err(|_| Error::LockPoisoned)?
            .save(path)
    }

    /// The report of the newest completed pass.
    pub fn current(&self) -> Option<Arc<PassReport>> {
        self.current.read().ok().and_then(|current| current.clone())
    }

    pub fn last_cancelled(&self) -> Option<CancelledPass> {
        self.last_cancelled.lock().ok().and_then(|last| *last)
    }

    /// Run every stage for `input`. See the module docs for the algorithm.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires before the pass
    /// completes; the previous report then stays current.
    pub fn run_full_pass(&self, input: &PassInput, cancel: &CancelToken) -> Result<Arc<PassReport>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "Pass {}: {} package(s), {} active, {} selection(s)",
            generation,
            input.packages.len(),
            input.load_order.len(),
            input.selections.len()
        );

        let result = if self.config.parallel {
            self.run_pass(generation, input, cancel)
        } else {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build()?;
            pool.install(|| self.run_pass(generation, input, cancel))
        };

        match result {
            Ok(report) => Ok(report),
            Err(Error::Cancelled) => {
                tracing::info!("Pass {} cancelled; partial results discarded", generation);
                if let Ok(mut last) = self.last_cancelled.lock() {
                    *last = Some(CancelledPass {
                        generation,
                        characters_processed: 0,
                    });
                }
                Err(Error::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    fn run_pass(
        &self,
        generation: u64,
        input: &PassInput,
        cancel: &CancelToken,
    ) -> Result<Arc<PassReport>> {
        let start_time = Instant::now();

        self.emit(generation, PassStage::Snapshotting, 0, input.packages.len());
        validate_load_order(&input.packages, &input.load_order)?;

        // Snapshot sequentially and split into reusable and stale packages.
        let mut snapshots: Vec<PackageSnapshot> = Vec::with_capacity(input.packages.len());
        let mut reused: Vec<Option<Arc<PackageIndex>>> = Vec::with_capacity(input.packages.len());
        {
            let cache = self.cache.lock().map_err(|_| Error::LockPoisoned)?;
            for package in &input.packages {
                cancel.check()?;
                let snapshot = compute_snapshot(package, cancel)?;
                let cached = cache
                    .get(package.id())
                    .filter(|entry| entry.reusable_for(&snapshot))
                    .map(|entry| entry.index.clone());
                if cached.is_some() {
                    tracing::debug!("Package={} unchanged; reusing index", package.id());
                }
                snapshots.push(snapshot);
                reused.push(cached);
            }
        }
        cancel.check()?;

        let stale: Vec<usize> = (0..input.packages.len())
            .filter(|&i| reused[i].is_none())
            .collect();
        self.emit(generation, PassStage::Indexing, 0, stale.len());
        let fresh: Vec<(usize, PackageIndex)> = stale
            .par_iter()
            .map(|&i| -> Result<(usize, PackageIndex)> {
                Ok((i, index_package(&input.packages[i], self.source.as_ref(), cancel)?))
            })
            .collect::<Result<_>>()?;
        self.emit(generation, PassStage::Indexing, stale.len(), stale.len());
        cancel.check()?;

        let mut indexes = reused;
        for (i, index) in fresh {
            indexes[i] = Some(Arc::new(index));
        }

        let mut catalog = Catalog::new();
        let mut staged_cache = Vec::with_capacity(input.packages.len());
        let mut reused_indexes = Vec::new();
        let mut degraded_packages = Vec::new();
        for (i, (package, snapshot)) in input.packages.iter().zip(snapshots).enumerate() {
            let Some(index) = indexes[i].take() else {
                continue;
            };
            if !stale.contains(&i) {
                reused_indexes.push(package.id().clone());
            }
            if index.is_degraded() {
                degraded_packages.push(package.id().clone());
            }
            staged_cache.push(CacheEntry {
                snapshot,
                index: index.clone(),
            });
            catalog.insert(package.clone(), index);
        }
        tracing::debug!("Catalog holds {} package(s)", catalog.len());

        // Resolution, memoized on the load order and the active snapshots.
        self.emit(generation, PassStage::Resolving, 0, 0);
        let fingerprints: Vec<u64> = input
            .load_order
            .iter()
            .filter_map(|id| staged_cache.iter().find(|e| e.snapshot.package == *id))
            .map(|e| e.snapshot.fingerprint())
            .collect();
        let all_active_reused = input
            .load_order
            .iter()
            .all(|id| reused_indexes.contains(id));

        let memo = self.resolution.lock().map_err(|_| Error::LockPoisoned)?.as_ref().and_then(
            |memo| {
                (all_active_reused
                    && memo.load_order == input.load_order
                    && memo.fingerprints == fingerprints)
                    .then(|| (memo.npcs.clone(), memo.races.clone()))
            },
        );
        let reused_resolution = memo.is_some();
        let (npcs, races) = match memo {
            Some(maps) => {
                tracing::info!("Load order and packages unchanged; reusing resolution");
                maps
            }
            None => {
                let (npcs, races) = rayon::join(
                    || resolve(&input.load_order, &catalog, RecordKind::Npc),
                    || resolve(&input.load_order, &catalog, RecordKind::Race),
                );
                (Arc::new(npcs), Arc::new(races))
            }
        };
        cancel.check()?;

        self.emit(generation, PassStage::Screening, 0, npcs.len());
        cancel.check()?;
        let screening = screen_all(&input.selections, &npcs, &catalog, self.source.as_ref());
        cancel.check()?;

        let processed = screening.len();
        self.emit(generation, PassStage::Forwarding, 0, processed);
        let forwarding = forward_dependencies(
            &screening,
            &races,
            &catalog,
            &input.load_order,
            &self.config.forwarding_config(),
        );
        cancel.check()?;

        self.emit(generation, PassStage::Writing, 0, processed);
        let output = write_patch(&screening, &forwarding);
        cancel.check()?;

        let report = Arc::new(PassReport {
            generation,
            output,
            forwarding,
            screening,
            degraded_packages,
            reused_indexes,
            reused_resolution,
            elapsed: start_time.elapsed(),
        });

        self.commit(&report, staged_cache, input.load_order.clone(), fingerprints, npcs, races)?;

        self.emit(generation, PassStage::Complete, processed, processed);
        tracing::info!(
            "Pass {} complete in {:?}: {} patched, {} unresolved, {} degraded package(s)",
            generation,
            report.elapsed,
            report.output.artifact.entries.len(),
            report.output.unresolved.len(),
            report.degraded_packages.len()
        );

        Ok(report)
    }

    /// Publish a completed pass. A pass older than the current report only
    /// refreshes the cache.
    fn commit(
        &self,
        report: &Arc<PassReport>,
        staged_cache: Vec<CacheEntry>,
        load_order: Vec<PackageId>,
        fingerprints: Vec<u64>,
        npcs: Arc<WinningMap>,
        races: Arc<WinningMap>,
    ) -> Result<()> {
        {
            let mut cache = self.cache.lock().map_err(|_| Error::LockPoisoned)?;
            for entry in staged_cache {
                cache.insert(entry);
            }
        }

        let mut current = self.current.write().map_err(|_| Error::LockPoisoned)?;
        if current
            .as_ref()
            .is_some_and(|existing| existing.generation > report.generation)
        {
            tracing::debug!(
                "Pass {} finished after a newer pass; not publishing",
                report.generation
            );
            return Ok(());
        }

        *self.resolution.lock().map_err(|_| Error::LockPoisoned)? = Some(ResolutionMemo {
            load_order,
            fingerprints,
            npcs,
            races,
        });
        *current = Some(report.clone());
        Ok(())
    }

    fn emit(&self, generation: u64, stage: PassStage, current: usize, total: usize) {
        if let Some(callback) = &self.progress_callback {
            callback(PassProgress {
                generation,
                stage,
                current: current as u32,
                total: total as u32,
            });
        }
    }
}

/// Installed package ids must be unique, and every load-order entry must name
/// an installed package, once.
fn validate_load_order(packages: &[Package], load_order: &[PackageId]) -> Result<()> {
    let mut installed: HashSet<&PackageId> = HashSet::with_capacity(packages.len());
    for package in packages {
        if !installed.insert(package.id()) {
            return Err(Error::DuplicatePackageId(package.id().to_string()));
        }
    }
    let mut seen = HashSet::new();
    for id in load_order {
        if !installed.contains(id) {
            return Err(Error::UnknownPackage(id.to_string()));
        }
        if !seen.insert(id) {
            return Err(Error::DuplicateLoadOrderEntry(id.to_string()));
        }
    }
    Ok(())
}
