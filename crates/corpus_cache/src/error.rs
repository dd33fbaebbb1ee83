//! src/error.rs
//!
//! Named failure conditions of the encoder and the on-disk cache.
//!
//! Library functions return `anyhow::Result`; these variants travel inside the
//! `anyhow::Error` and can be recovered with `err.downcast_ref::<CacheError>()`.

use std::path::PathBuf;

/// Errors raised by the encoder and by the persistent cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A raw record has no decomposable paragraph/sentence structure.
    #[error("Malformed document '{doc_id}': {reason}")]
    MalformedDocument { doc_id: String, reason: String },

    /// The cache directory or its metadata file does not exist.
    #[error("Cache not found: {0}")]
    CacheNotFound(PathBuf),

    /// Metadata is unreadable or disagrees with the files on disk.
    #[error("Cache at {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// A requested row index is `>=` the cache row count.
    #[error("Index {index} out of range for cache of {len} rows")]
    IndexOutOfRange { index: usize, len: usize },
}

impl CacheError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
