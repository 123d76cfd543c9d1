//! Error types for resolution passes.
//!
//! Missing data (no override, no assets, no dependent record) is never an
//! error: it is encoded in [`ScreeningResult`](crate::ScreeningResult) and
//! surfaced through the unresolved list. Errors here cover unusable inputs,
//! output I/O and cancellation.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (writing the patch, reading the cache, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (records, patch output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to decode the persisted snapshot cache.
    #[error("Cache decode error: {0}")]
    CacheDecode(#[from] rmp_serde::decode::Error),

    /// Failed to encode the snapshot cache.
    #[error("Cache encode error: {0}")]
    CacheEncode(#[from] rmp_serde::encode::Error),

    /// A package manifest could not be read.
    #[error("Package error: {0}")]
    Package(#[from] npc_package::Error),

    /// A package was declared without any layer folder.
    #[error("Package '{0}' has no layers")]
    EmptyPackage(String),

    /// A form key string is not of the form `0A1B2C:Plugin.esp`.
    #[error("Invalid form key: {0}")]
    InvalidFormKey(String),

    /// The load order names a package that is not installed.
    #[error("Unknown package in load order: {0}")]
    UnknownPackage(String),

    /// Two installed packages share one id.
    #[error("Package id '{0}' is used by more than one installed package")]
    DuplicatePackageId(String),

    /// The same package id appears twice in the load order.
    #[error("Package '{0}' appears more than once in the load order")]
    DuplicateLoadOrderEntry(String),

    /// A record file exists but could not be interpreted.
    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: Utf8PathBuf, reason: String },

    /// A shared engine lock was poisoned by a panicking pass.
    #[error("Engine state lock poisoned")]
    LockPoisoned,

    /// The single-threaded worker pool could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The pass was abandoned through its cancellation token.
    #[error("Resolution pass cancelled")]
    Cancelled,
}
