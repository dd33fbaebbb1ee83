//! src/pipeline.rs
//!
//! One-shot transform of a raw corpus into a committed cache.
//!
//! ```text
//!   DataSource<RawDocument> ──chunk──▶ Encoder (rayon, per document)
//!                                         │
//!                                         ▼
//!                                MinSentenceFilter ──▶ CacheWriter ──commit──▶ cache_dir
//! ```
//!
//! The run is all-or-nothing: the first reader, encoder or write error aborts
//! it, the staging directory is deleted, and a previous cache at the target
//! (if any) stays as it was.

use crate::cache::{CacheWriter, CommitSummary};
use crate::config::WriterConfig;
use crate::dataset::DataSource;
use crate::document::{EncodedDocument, RawDocument};
use crate::encoder::{Encoder, MinSentenceFilter, SentenceTokenizer};
use crate::transform::Transform;
use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Counts from one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub documents_read: usize,
    pub documents_kept: usize,
    pub documents_filtered: usize,
    /// Sentences across kept documents.
    pub sentences: usize,
    /// Token ids across kept documents.
    pub tokens: usize,
    pub segments: usize,
    pub elapsed: Duration,
}

/// Encodes, filters and persists a whole corpus.
///
/// # Example
/// ```ignore
/// let tokenizer = HfTokenizer::from_config(&EncoderConfig::pretrained("bert-base-cased"))?;
/// let pipeline = CorpusTransform::new(Encoder::new(tokenizer));
/// let report = pipeline.run(&JsonlSource::new("corpus.jsonl"), "cache_dir")?;
/// ```
pub struct CorpusTransform<T> {
    encoder: Encoder<T>,
    filter: MinSentenceFilter,
    writer_config: WriterConfig,
    chunk_size: usize,
    limit: Option<usize>,
}

impl<T: SentenceTokenizer> CorpusTransform<T> {
    pub fn new(encoder: Encoder<T>) -> Self {
        Self {
            encoder,
            filter: MinSentenceFilter::default(),
            writer_config: WriterConfig::default(),
            chunk_size: 256,
            limit: None,
        }
    }

    pub fn with_writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Documents handed to the parallel encoder at a time.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Reads at most `limit` raw documents (useful for trial runs).
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Runs the pipeline from `source` into a new cache at `target`.
    pub fn run<S>(&self, source: &S, target: impl AsRef<Path>) -> Result<PipelineReport>
    where
        S: DataSource<RawDocument> + ?Sized,
    {
        ensure!(
            self.chunk_size > 0,
            "chunk_size must be > 0, but got chunk_size={}",
            self.chunk_size
        );
        let target = target.as_ref();
        let started = Instant::now();
        let stage = (&self.encoder).then(self.filter);

        let mut writer = CacheWriter::create(target, self.writer_config)?;
        let mut documents = source.stream()?;
        if let Some(limit) = self.limit {
            documents = Box::new(documents.take(limit));
        }

        let mut report = PipelineReport {
            documents_read: 0,
            documents_kept: 0,
            documents_filtered: 0,
            sentences: 0,
            tokens: 0,
            segments: 0,
            elapsed: Duration::ZERO,
        };
        let mut chunk: Vec<RawDocument> = Vec::with_capacity(self.chunk_size);

        loop {
            chunk.clear();
            for doc in documents.by_ref().take(self.chunk_size) {
                chunk.push(doc.context("Failed to read raw corpus")?);
            }
            if chunk.is_empty() {
                break;
            }
            if report.documents_read == 0 {
                debug!(document = ?chunk[0], "First raw document");
            }
            report.documents_read += chunk.len();

            let encoded: Vec<Option<EncodedDocument>> = chunk
                .par_drain(..)
                .map(|doc| {
                    let doc_id = doc.doc_id.clone();
                    stage
                        .apply(doc)
                        .with_context(|| format!("Failed to encode document '{}'", doc_id))
                })
                .collect::<Result<_>>()?;

            for doc in encoded {
                match doc {
                    Some(doc) => {
                        if report.documents_kept == 0 {
                            debug!(document = ?doc, "First encoded document");
                        }
                        report.documents_kept += 1;
                        report.sentences += doc.num_sentences();
                        report.tokens += doc.num_tokens();
                        writer.append(doc)?;
                    }
                    None => report.documents_filtered += 1,
                }
            }
            debug!(
                read = report.documents_read,
                kept = report.documents_kept,
                "Processed chunk"
            );
        }

        info!(
            before_filter = report.documents_read,
            after_filter = report.documents_kept,
            "Dropped single-sentence documents"
        );
        let CommitSummary { num_segments, .. } = writer.commit()?;
        report.segments = num_segments;
        report.elapsed = started.elapsed();
        info!(
            documents = report.documents_kept,
            sentences = report.sentences,
            tokens = report.tokens,
            segments = report.segments,
            seconds = report.elapsed.as_secs_f64(),
            "Corpus transform finished"
        );
        Ok(report)
    }
}
