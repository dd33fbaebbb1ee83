//! src/config.rs
//!
//! Configuration for the encoder, the cache writer and the batch sampler.
//!
//! Example:
//! ```ignore
//! let config = SamplerConfig::builder()
//!     .batch_size(2000)
//!     .max_steps(1000)
//!     .strategy(Strategy::Batched)
//!     .seed(42)
//!     .build()?;
//! ```

use anyhow::{anyhow, ensure, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ================================================================================================
// 1. Encoder
// ================================================================================================

/// Where the tokenizer definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerSource {
    /// A local `tokenizer.json`.
    File(PathBuf),
    /// A HuggingFace hub identifier, e.g. `neuralmind/bert-large-portuguese-cased`.
    Pretrained(String),
}

impl TokenizerSource {
    /// Interprets `source` as a file if it exists on disk, otherwise as a hub id.
    pub fn resolve(source: &str) -> Self {
        let path = PathBuf::from(source);
        if path.is_file() {
            Self::File(path)
        } else {
            Self::Pretrained(source.to_string())
        }
    }
}

/// Immutable encoder settings, built once and passed by reference.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub tokenizer: TokenizerSource,
    /// Lowercase inputs before tokenization (`false` for cased vocabularies).
    pub lowercase: bool,
    pub add_special_tokens: bool,
}

impl EncoderConfig {
    pub fn pretrained(identifier: impl Into<String>) -> Self {
        Self {
            tokenizer: TokenizerSource::Pretrained(identifier.into()),
            lowercase: false,
            add_special_tokens: true,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            tokenizer: TokenizerSource::File(path.into()),
            lowercase: false,
            add_special_tokens: true,
        }
    }

    /// Settings for a tokenizer named on the command line: a local file if
    /// one exists at `source`, otherwise a hub identifier.
    pub fn resolve(source: &str) -> Self {
        match TokenizerSource::resolve(source) {
            TokenizerSource::File(path) => Self::file(path),
            TokenizerSource::Pretrained(identifier) => Self::pretrained(identifier),
        }
    }

    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn with_special_tokens(mut self, add: bool) -> Self {
        self.add_special_tokens = add;
        self
    }
}

// ================================================================================================
// 2. Cache writer
// ================================================================================================

/// Physical layout of a cache being written.
///
/// - `rows_per_segment`: documents per Parquet segment file
/// - `rows_per_row_group`: documents per row group inside a segment; this is the
///   decode unit of [`CorpusCache::get_one`](crate::cache::CorpusCache::get_one)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub rows_per_segment: usize,
    pub rows_per_row_group: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            rows_per_segment: 65_536,
            rows_per_row_group: 1_024,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.rows_per_row_group > 0,
            "rows_per_row_group must be > 0, but got rows_per_row_group={}",
            self.rows_per_row_group
        );
        ensure!(
            self.rows_per_segment >= self.rows_per_row_group,
            "rows_per_segment ({}) must be >= rows_per_row_group ({})",
            self.rows_per_segment,
            self.rows_per_row_group
        );
        Ok(())
    }
}

// ================================================================================================
// 3. Batch sampler
// ================================================================================================

/// How a batch is materialized from the dataset.
///
/// Both strategies produce identical batches for the same permutation; they
/// differ only in memory and latency profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Strategy {
    /// One `get_one` call per index. Memory grows with the steps taken.
    #[value(name = "per_item")]
    PerItem,
    /// One `get_many` call per batch. Bounded memory per step.
    #[default]
    #[value(name = "batched")]
    Batched,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::PerItem => write!(f, "per_item"),
            Strategy::Batched => write!(f, "batched"),
        }
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per_item" => Ok(Strategy::PerItem),
            "batched" => Ok(Strategy::Batched),
            other => Err(anyhow!(
                "Unknown strategy '{}', expected 'per_item' or 'batched'",
                other
            )),
        }
    }
}

/// Configuration for one batch sampler.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Documents per batch (> 0).
    pub batch_size: usize,
    /// Upper bound on batches per session (> 0).
    pub max_steps: usize,
    pub strategy: Strategy,
    /// Shuffle seed. `None` draws a fresh seed for every session.
    pub seed: Option<u64>,
}

impl SamplerConfig {
    pub fn builder() -> SamplerConfigBuilder {
        SamplerConfigBuilder::default()
    }

    /// Checks `batch_size > 0` and `max_steps > 0`.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.batch_size > 0,
            "batch_size must be > 0, but got batch_size={}",
            self.batch_size
        );
        ensure!(
            self.max_steps > 0,
            "max_steps must be > 0, but got max_steps={}",
            self.max_steps
        );
        Ok(())
    }
}

/// Builder for [`SamplerConfig`] with method chaining.
#[derive(Debug, Default)]
pub struct SamplerConfigBuilder {
    batch_size: Option<usize>,
    max_steps: Option<usize>,
    strategy: Strategy,
    seed: Option<u64>,
}

impl SamplerConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fix the shuffle seed so every session replays the same permutation.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// `max_steps` defaults to `usize::MAX`, i.e. run until the permutation is
    /// exhausted.
    pub fn build(self) -> Result<SamplerConfig> {
        let batch_size = self
            .batch_size
            .ok_or_else(|| anyhow!("batch_size must be set"))?;
        let config = SamplerConfig {
            batch_size,
            max_steps: self.max_steps.unwrap_or(usize::MAX),
            strategy: self.strategy,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}
