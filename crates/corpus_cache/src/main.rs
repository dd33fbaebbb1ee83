//! corpus-cache: build a tokenized corpus cache and sample batches from it.
//!
//! Usage:
//!   corpus-cache preprocess --corpus brwac.jsonl --cache brwac/processed \
//!       --tokenizer neuralmind/bert-large-portuguese-cased
//!   corpus-cache inspect --cache brwac/processed
//!   corpus-cache sample --cache brwac/processed --batch-size 2000 \
//!       --max-steps 1000 --strategy batched

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corpus_cache::config::{EncoderConfig, SamplerConfig, Strategy, WriterConfig};
use corpus_cache::instrument::{secs, timed, MemoryProbe};
use corpus_cache::{
    Batch, BatchSampler, CorpusCache, CorpusTransform, Encoder, HfTokenizer, JsonlSource,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(
    name = "corpus-cache",
    about = "Tokenize a corpus into an on-disk cache and sample random batches from it"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode every document, drop single-sentence documents, commit the cache.
    Preprocess {
        /// JSON-lines corpus, one document per line.
        #[arg(long, env = "CORPUS_PATH")]
        corpus: PathBuf,
        #[arg(long, env = "CACHE_PATH")]
        cache: PathBuf,
        /// Path to a tokenizer.json, or a HuggingFace hub identifier.
        #[arg(long, env = "TOKENIZER")]
        tokenizer: String,
        /// Lowercase sentences before tokenizing (uncased vocabularies only).
        #[arg(long)]
        lowercase: bool,
        #[arg(long)]
        no_special_tokens: bool,
        /// Read at most this many raw documents.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = WriterConfig::default().rows_per_segment)]
        rows_per_segment: usize,
        #[arg(long, default_value_t = WriterConfig::default().rows_per_row_group)]
        rows_per_row_group: usize,
    },
    /// Open a cache and print its size and first document.
    Inspect {
        #[arg(long, env = "CACHE_PATH")]
        cache: PathBuf,
    },
    /// Run one sampling session, logging latency and resident memory per step.
    Sample {
        #[arg(long, env = "CACHE_PATH")]
        cache: PathBuf,
        #[arg(long, env = "BATCH_SIZE", default_value_t = 2000)]
        batch_size: usize,
        #[arg(long, env = "MAX_STEPS", default_value_t = 1000)]
        max_steps: usize,
        #[arg(long, env = "STRATEGY", value_enum, default_value_t = Strategy::Batched)]
        strategy: Strategy,
        #[arg(long, env = "SEED")]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("corpus_cache=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Preprocess {
            corpus,
            cache,
            tokenizer,
            lowercase,
            no_special_tokens,
            limit,
            rows_per_segment,
            rows_per_row_group,
        } => timed("preprocess", || {
            let config = EncoderConfig::resolve(&tokenizer)
                .with_lowercase(lowercase)
                .with_special_tokens(!no_special_tokens);
            let writer_config = WriterConfig {
                rows_per_segment,
                rows_per_row_group,
            };
            preprocess(&corpus, &cache, &config, writer_config, limit)
        }),
        Command::Inspect { cache } => timed("inspect", || inspect(&cache)),
        Command::Sample {
            cache,
            batch_size,
            max_steps,
            strategy,
            seed,
        } => timed("sample", || {
            let mut builder = SamplerConfig::builder()
                .batch_size(batch_size)
                .max_steps(max_steps)
                .strategy(strategy);
            if let Some(seed) = seed {
                builder = builder.seed(seed);
            }
            sample(&cache, builder.build()?)
        }),
    }
}

fn preprocess(
    corpus: &Path,
    cache: &Path,
    config: &EncoderConfig,
    writer_config: WriterConfig,
    limit: Option<usize>,
) -> Result<()> {
    let tokenizer = HfTokenizer::from_config(config)?;
    let report = CorpusTransform::new(Encoder::new(tokenizer))
        .with_writer_config(writer_config)
        .with_limit(limit)
        .run(&JsonlSource::new(corpus), cache)
        .with_context(|| format!("Failed to build cache at {}", cache.display()))?;
    println!(
        "documents: {} read, {} kept, {} filtered; {} sentences, {} tokens in {} segments",
        report.documents_read,
        report.documents_kept,
        report.documents_filtered,
        report.sentences,
        report.tokens,
        report.segments
    );
    Ok(())
}

fn inspect(cache: &Path) -> Result<()> {
    let started = Instant::now();
    let handle = CorpusCache::open(cache)?;
    info!(seconds = secs(started.elapsed()), "Cache opened");
    println!("path: {}", handle.path().display());
    println!("rows: {}", handle.len());
    println!("segments: {}", handle.metadata().segments.len());
    match handle.first()? {
        Some(doc) => println!("first document: {:?}", doc),
        None => println!("first document: <empty cache>"),
    }
    Ok(())
}

fn sample(cache: &Path, config: SamplerConfig) -> Result<()> {
    let handle = CorpusCache::open(cache)?;
    let sampler = BatchSampler::new(&handle, config)?;
    let mut probe = MemoryProbe::new();
    let mut steps = 0usize;
    let mut last = Instant::now();

    for batch in sampler.session() {
        let batch = batch?;
        consume(&batch);
        let memory_mb = probe.sample_mb();
        debug!(
            step = batch.step,
            seconds = secs(last.elapsed()),
            memory_mb,
            retained_rows = handle.retained_rows(),
            "Step done"
        );
        last = Instant::now();
        steps += 1;
    }

    info!(
        steps,
        pid = ?probe.pid(),
        strategy = %sampler.config().strategy,
        baseline_mb = probe.baseline_mb(),
        peak_mb = probe.peak_mb(),
        retained_rows = handle.retained_rows(),
        "Sampling session finished"
    );
    println!(
        "{} batches of {} ({}): peak memory {:.1} MB (baseline {:.1} MB)",
        steps,
        sampler.config().batch_size,
        sampler.config().strategy,
        probe.peak_mb(),
        probe.baseline_mb()
    );
    Ok(())
}

/// Stand-in for a training step.
fn consume(batch: &Batch) {
    debug!(step = batch.step, documents = batch.len(), tokens = batch.num_tokens(), "Consumed batch");
}
