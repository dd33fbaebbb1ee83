//! # corpus_cache
//!
//! Tokenize a large raw document corpus once, persist it as an immutable
//! columnar cache on disk, and draw randomized fixed-size batches from it
//! without loading the corpus into memory.
//!
//! ```text
//!   raw corpus ─▶ Encoder ─▶ CorpusTransform ─▶ CacheWriter ─▶ cache dir
//!                                                               │
//!                          consumer ◀─ BatchSampler ◀─ CorpusCache::open
//! ```
//!
//! * **[`Encoder`]**: one batched tokenizer call per document.
//! * **[`CorpusTransform`]**: encode, drop single-sentence documents, commit.
//! * **[`CorpusCache`]**: `open`, `len`, `get_one`, `get_many`.
//! * **[`BatchSampler`]**: shuffled sessions under the `per_item` or `batched`
//!   strategy.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod document;
pub mod encoder;
pub mod error;
pub mod instrument;
pub mod pipeline;
pub mod readers;
pub mod sampler;
pub mod transform;

pub use cache::{CacheWriter, CorpusCache};
pub use config::{EncoderConfig, SamplerConfig, Strategy, TokenizerSource, WriterConfig};
pub use dataset::{DataSource, Dataset, InMemoryCorpus};
pub use document::{EncodedDocument, RawDocument};
pub use encoder::{Encoder, HfTokenizer, MinSentenceFilter, SentenceTokenizer};
pub use error::CacheError;
pub use pipeline::{CorpusTransform, PipelineReport};
pub use readers::JsonlSource;
pub use sampler::{Batch, BatchSampler, IterationState, Session};
pub use transform::Transform;
