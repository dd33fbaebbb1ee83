//! src/cache/mod.rs
//!
//! The persistent encoded-document cache.
//!
//! ```text
//!   EncodedDocument ──append──▶ CacheWriter ──commit──▶ cache_dir/
//!                                (staging dir)            ├── cache_meta.json
//!                                                         └── segment-*.parquet
//!                                                                 │
//!                          CorpusCache::open ◀────────────────────┘
//!                             ├── get_one(i)      decode + retain row group
//!                             └── get_many(&[i])  decode selected rows only
//! ```
//!
//! A cache is immutable once committed. One writer builds it; afterwards any
//! number of readers may open it concurrently without locking.

pub mod metadata;
pub mod reader;
pub mod writer;

pub use metadata::{CacheMetadata, SegmentInfo, METADATA_FILE};
pub use reader::CorpusCache;
pub use writer::{CacheWriter, CommitSummary};
