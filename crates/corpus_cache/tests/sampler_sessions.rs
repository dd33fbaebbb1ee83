//! Sampling sessions over a real on-disk cache.
//!
//! Tests cover:
//! - Reopening a cache is idempotent across handles
//! - Batch completeness: `floor(N / b)` full, disjoint batches
//! - `per_item` and `batched` strategies agree for the same seed
//! - Row groups retained by `per_item` grow with visited rows; `batched` retains none
//! - Independent sessions can run concurrently over one handle

mod common;
use common::cache_with_rows;

use corpus_cache::{
    Batch, BatchSampler, CacheError, CorpusCache, Dataset, SamplerConfig, Strategy,
};

use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

// ============================================================================
// Common Helper Functions
// ============================================================================

fn config(batch_size: usize, strategy: Strategy) -> Result<SamplerConfig> {
    SamplerConfig::builder()
        .batch_size(batch_size)
        .strategy(strategy)
        .seed(7)
        .build()
}

fn collect_session(
    cache: &CorpusCache,
    config: SamplerConfig,
    seed: u64,
) -> Result<Vec<Batch>> {
    BatchSampler::new(cache, config)?
        .session_with_seed(seed)
        .collect()
}

// ============================================================================
// Opening
// ============================================================================

#[test]
fn test_open_is_idempotent() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 17)?;

    let a = CorpusCache::open(&target)?;
    let b = CorpusCache::open(&target)?;
    assert_eq!(a.len(), b.len());
    assert_eq!(a.path(), b.path());
    assert_eq!(a.metadata(), b.metadata());
    for i in [0, 4, 9, 10, 16] {
        assert_eq!(a.get_one(i)?, b.get_one(i)?);
    }

    // Spans both segments, out of order, with repeats.
    let indices = [16, 3, 10, 3, 0, 12, 16, 9];
    let from_a = a.get_many(&indices)?;
    let from_b = b.get_many(&indices)?;
    assert_eq!(from_a, from_b);
    assert_eq!(from_a.len(), indices.len());
    assert_eq!(from_a[1], from_a[3]);
    assert_eq!(from_a[0], b.get_one(16)?);
    Ok(())
}

// ============================================================================
// Batch shape
// ============================================================================

#[test]
fn test_batch_completeness() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 23)?;
    let cache = CorpusCache::open(&target)?;

    let batches = collect_session(&cache, config(5, Strategy::Batched)?, 11)?;
    assert_eq!(batches.len(), 4);

    let mut seen = HashSet::new();
    for (step, batch) in batches.iter().enumerate() {
        assert_eq!(batch.step, step);
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.indices.len(), batch.documents.len());
        for (&index, doc) in batch.indices.iter().zip(&batch.documents) {
            assert!(seen.insert(index), "index {index} drawn twice");
            assert_eq!(*doc, cache.get_many(&[index])?[0]);
        }
    }
    assert_eq!(seen.len(), 20);
    Ok(())
}

#[test]
fn test_batch_size_larger_than_cache_yields_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 6)?;
    let cache = CorpusCache::open(&target)?;

    let sampler = BatchSampler::new(&cache, config(7, Strategy::Batched)?)?;
    assert_eq!(sampler.num_batches(), 0);
    assert_eq!(sampler.session().count(), 0);
    Ok(())
}

#[test]
fn test_empty_cache_yields_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 0)?;
    let cache = CorpusCache::open(&target)?;

    for strategy in [Strategy::PerItem, Strategy::Batched] {
        assert_eq!(collect_session(&cache, config(1, strategy)?, 3)?.len(), 0);
    }
    Ok(())
}

#[test]
fn test_max_steps_caps_session() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 30)?;
    let cache = CorpusCache::open(&target)?;

    let config = SamplerConfig::builder()
        .batch_size(4)
        .max_steps(3)
        .build()?;
    let batches = collect_session(&cache, config, 5)?;
    assert_eq!(batches.len(), 3);
    assert_eq!(batches.last().map(|b| b.step), Some(2));
    Ok(())
}

// ============================================================================
// Strategies
// ============================================================================

#[test]
fn test_strategies_yield_identical_batches() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 37)?;
    let per_item_cache = CorpusCache::open(&target)?;
    let batched_cache = CorpusCache::open(&target)?;

    for seed in [0, 1, 99] {
        let per_item = collect_session(&per_item_cache, config(6, Strategy::PerItem)?, seed)?;
        let batched = collect_session(&batched_cache, config(6, Strategy::Batched)?, seed)?;
        assert_eq!(per_item.len(), 6);
        assert_eq!(per_item, batched);
    }
    Ok(())
}

#[test]
fn test_configured_seed_is_reproducible() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 20)?;
    let cache = CorpusCache::open(&target)?;

    let sampler = BatchSampler::new(&cache, config(4, Strategy::Batched)?)?;
    let first: Vec<Vec<usize>> = sampler
        .session()
        .map(|b| b.map(|b| b.indices))
        .collect::<Result<_>>()?;
    let second: Vec<Vec<usize>> = sampler
        .session()
        .map(|b| b.map(|b| b.indices))
        .collect::<Result<_>>()?;
    assert_eq!(first, second);
    Ok(())
}

// ============================================================================
// Memory profile
// ============================================================================

#[test]
fn test_per_item_retains_visited_row_groups() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 40)?;
    let cache = CorpusCache::open(&target)?;
    assert_eq!(cache.retained_rows(), 0);

    let sampler = BatchSampler::new(&cache, config(4, Strategy::PerItem)?)?;
    let mut previous = 0;
    for batch in sampler.session() {
        batch?;
        let retained = cache.retained_rows();
        assert!(retained >= previous, "retained rows shrank mid-session");
        previous = retained;
    }
    // Ten full batches visit every row, so every row group is held.
    assert_eq!(cache.retained_rows(), cache.len());

    cache.release_retained()?;
    assert_eq!(cache.retained_rows(), 0);
    Ok(())
}

#[test]
fn test_batched_retains_nothing() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 40)?;
    let cache = CorpusCache::open(&target)?;

    let sampler = BatchSampler::new(&cache, config(4, Strategy::Batched)?)?;
    for batch in sampler.session() {
        batch?;
        assert_eq!(cache.retained_rows(), 0);
    }
    Ok(())
}

// ============================================================================
// Concurrency and errors
// ============================================================================

#[test]
fn test_concurrent_sessions_share_one_handle() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 32)?;
    let cache = CorpusCache::open(&target)?;
    let expected = collect_session(&cache, config(8, Strategy::Batched)?, 42)?;

    std::thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = [Strategy::PerItem, Strategy::Batched, Strategy::Batched]
            .into_iter()
            .map(|strategy| {
                let cache = &cache;
                scope.spawn(move || collect_session(cache, config(8, strategy)?, 42))
            })
            .collect();
        for handle in handles {
            let batches = handle
                .join()
                .map_err(|_| anyhow::anyhow!("sampling thread panicked"))??;
            assert_eq!(batches, expected);
        }
        Ok(())
    })
}

#[test]
fn test_out_of_range_reads_fail() -> Result<()> {
    let root = TempDir::new()?;
    let target = root.path().join("processed");
    cache_with_rows(&target, 9)?;
    let cache = CorpusCache::open(&target)?;

    let err = cache.get_one(9).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CacheError>(),
        Some(CacheError::IndexOutOfRange { index: 9, len: 9 })
    ));
    let err = Dataset::get_many(&cache, &[1, 12]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CacheError>(),
        Some(CacheError::IndexOutOfRange { index: 12, .. })
    ));
    Ok(())
}
