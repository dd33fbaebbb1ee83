//! src/sampler.rs
//!
//! Randomized fixed-size batches over a [`Dataset`].
//!
//! A [`BatchSampler`] is cheap configuration. Each call to
//! [`BatchSampler::session`] shuffles a fresh permutation of `0..len` into an
//! [`IterationState`] and returns a [`Session`], a lazy finite iterator of
//! [`Batch`]es. Sessions own their state, so several can run over the same
//! dataset at once.
//!
//! # Termination
//! A session ends after `max_steps` batches, or as soon as fewer than
//! `batch_size` unvisited indices remain. Partial trailing batches are never
//! produced, so a dataset of `N` rows yields `min(N / batch_size, max_steps)`
//! batches.
//!
//! # Strategies
//! - [`Strategy::PerItem`]: one `get_one` per index.
//! - [`Strategy::Batched`]: one `get_many` per batch.
//!
//! For the same seed both strategies yield identical batches in the same order.
//! Batches are materialized one at a time with no look-ahead.
//!
//! # Example
//! ```ignore
//! let cache = CorpusCache::open("brwac/processed")?;
//! let config = SamplerConfig::builder()
//!     .batch_size(2000)
//!     .max_steps(1000)
//!     .strategy(Strategy::Batched)
//!     .build()?;
//! for batch in BatchSampler::new(&cache, config)?.session() {
//!     let batch = batch?;
//!     train_step(&batch.documents);
//! }
//! ```

use crate::config::{SamplerConfig, Strategy};
use crate::dataset::Dataset;
use crate::document::EncodedDocument;
use anyhow::Result;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;
use tracing::{debug, info};

/// Shuffled visiting order plus progress through it.
///
/// Created at session start and discarded with the session; it is never
/// persisted, so every session without a fixed seed sees a new order.
#[derive(Debug, Clone)]
pub struct IterationState {
    permutation: Vec<usize>,
    cursor: usize,
    step: usize,
    seed: u64,
}

impl IterationState {
    /// Uniformly shuffles `0..len` with an RNG seeded from `seed`.
    pub fn new(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut permutation: Vec<usize> = (0..len).collect();
        permutation.shuffle(&mut rng);
        Self {
            permutation,
            cursor: 0,
            step: 0,
            seed,
        }
    }

    /// Takes the next `batch_size` indices, or `None` if fewer remain.
    fn take(&mut self, batch_size: usize) -> Option<Vec<usize>> {
        if self.remaining() < batch_size {
            return None;
        }
        let indices = self.permutation[self.cursor..self.cursor + batch_size].to_vec();
        self.cursor += batch_size;
        Some(indices)
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Batches produced so far.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn remaining(&self) -> usize {
        self.permutation.len() - self.cursor
    }
}

/// One materialized batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of the batch within its session.
    pub step: usize,
    /// Dataset rows, in the order they were drawn.
    pub indices: Vec<usize>,
    /// One document per entry of `indices`, same order.
    pub documents: Vec<EncodedDocument>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn num_tokens(&self) -> usize {
        self.documents.iter().map(EncodedDocument::num_tokens).sum()
    }
}

/// Draws randomized fixed-size batches from a dataset.
pub struct BatchSampler<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    config: SamplerConfig,
}

impl<'a, D: Dataset + ?Sized> BatchSampler<'a, D> {
    /// Fails if `config` has a zero `batch_size` or `max_steps`.
    pub fn new(dataset: &'a D, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { dataset, config })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Batches a session will produce: `min(len / batch_size, max_steps)`.
    pub fn num_batches(&self) -> usize {
        (self.dataset.len() / self.config.batch_size).min(self.config.max_steps)
    }

    /// Starts a session using the configured seed, or a fresh random seed.
    pub fn session(&self) -> Session<'a, D> {
        let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
        self.session_with_seed(seed)
    }

    /// Starts a session with an explicit seed, ignoring the configured one.
    pub fn session_with_seed(&self, seed: u64) -> Session<'a, D> {
        let state = IterationState::new(self.dataset.len(), seed);
        info!(
            rows = self.dataset.len(),
            batch_size = self.config.batch_size,
            max_steps = self.config.max_steps,
            strategy = %self.config.strategy,
            seed,
            "Starting sampling session"
        );
        Session {
            dataset: self.dataset,
            batch_size: self.config.batch_size,
            max_steps: self.config.max_steps,
            strategy: self.config.strategy,
            state,
            finished: false,
        }
    }
}

/// A lazy, finite, non-restartable sequence of batches.
///
/// Dropping the session between batches cancels it; nothing else needs
/// cleaning up. After an error the session yields nothing further.
pub struct Session<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    max_steps: usize,
    strategy: Strategy,
    state: IterationState,
    finished: bool,
}

impl<D: Dataset + ?Sized> Session<'_, D> {
    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn materialize(&self, indices: &[usize]) -> Result<Vec<EncodedDocument>> {
        match self.strategy {
            Strategy::PerItem => indices.iter().map(|&i| self.dataset.get_one(i)).collect(),
            Strategy::Batched => self.dataset.get_many(indices),
        }
    }
}

impl<D: Dataset + ?Sized> Iterator for Session<'_, D> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.state.step >= self.max_steps {
            return None;
        }
        let Some(indices) = self.state.take(self.batch_size) else {
            debug!(step = self.state.step, "Permutation exhausted");
            self.finished = true;
            return None;
        };

        let started = Instant::now();
        match self.materialize(&indices) {
            Ok(documents) => {
                let step = self.state.step;
                self.state.step += 1;
                debug!(
                    step,
                    strategy = %self.strategy,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Materialized batch"
                );
                Some(Ok(Batch {
                    step,
                    indices,
                    documents,
                }))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            return (0, Some(0));
        }
        let left = (self.state.remaining() / self.batch_size)
            .min(self.max_steps.saturating_sub(self.state.step));
        (0, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryCorpus;
    use std::collections::HashSet;

    fn corpus(n: usize) -> InMemoryCorpus {
        InMemoryCorpus::new(
            (0..n)
                .map(|i| EncodedDocument::new(vec![vec![i as u32], vec![0]]))
                .collect(),
        )
    }

    fn config(batch_size: usize, max_steps: usize, strategy: Strategy) -> SamplerConfig {
        SamplerConfig::builder()
            .batch_size(batch_size)
            .max_steps(max_steps)
            .strategy(strategy)
            .seed(7)
            .build()
            .unwrap()
    }

    #[test]
    fn test_permutation_is_complete_and_seeded() {
        let a = IterationState::new(50, 3);
        let b = IterationState::new(50, 3);
        let c = IterationState::new(50, 4);
        assert_eq!(a.permutation(), b.permutation());
        assert_ne!(a.permutation(), c.permutation());

        let mut sorted = a.permutation().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_full_batches_only() -> Result<()> {
        let dataset = corpus(10);
        let sampler = BatchSampler::new(&dataset, config(3, 100, Strategy::Batched))?;
        assert_eq!(sampler.num_batches(), 3);

        let batches: Vec<Batch> = sampler.session().collect::<Result<_>>()?;
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 3));
        assert_eq!(
            batches.iter().map(|b| b.step).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let drawn: HashSet<usize> = batches.iter().flat_map(|b| b.indices.clone()).collect();
        assert_eq!(drawn.len(), 9);
        assert!(drawn.iter().all(|&i| i < 10));
        Ok(())
    }

    #[test]
    fn test_max_steps_caps_session() -> Result<()> {
        let dataset = corpus(100);
        let sampler = BatchSampler::new(&dataset, config(5, 4, Strategy::PerItem))?;
        let mut session = sampler.session();
        assert_eq!(session.size_hint(), (0, Some(4)));
        let batches: Vec<Batch> = session.by_ref().collect::<Result<_>>()?;
        assert_eq!(batches.len(), 4);
        assert_eq!(session.state().step(), 4);
        assert_eq!(session.state().cursor(), 20);
        assert!(session.next().is_none());
        Ok(())
    }

    #[test]
    fn test_documents_follow_indices() -> Result<()> {
        let dataset = corpus(20);
        let sampler = BatchSampler::new(&dataset, config(4, 10, Strategy::PerItem))?;
        for batch in sampler.session() {
            let batch = batch?;
            for (index, doc) in batch.indices.iter().zip(&batch.documents) {
                assert_eq!(doc.encoded_sentences[0], vec![*index as u32]);
            }
        }
        Ok(())
    }

    #[test]
    fn test_strategies_yield_identical_batches() -> Result<()> {
        let dataset = corpus(37);
        let per_item: Vec<Batch> = BatchSampler::new(&dataset, config(5, 100, Strategy::PerItem))?
            .session()
            .collect::<Result<_>>()?;
        let batched: Vec<Batch> = BatchSampler::new(&dataset, config(5, 100, Strategy::Batched))?
            .session()
            .collect::<Result<_>>()?;
        assert_eq!(per_item.len(), 7);
        assert_eq!(per_item, batched);
        Ok(())
    }

    #[test]
    fn test_small_and_empty_datasets_yield_nothing() -> Result<()> {
        let empty = corpus(0);
        assert_eq!(
            BatchSampler::new(&empty, config(1, 10, Strategy::Batched))?
                .session()
                .count(),
            0
        );
        let small = corpus(3);
        assert_eq!(
            BatchSampler::new(&small, config(4, 10, Strategy::PerItem))?
                .session()
                .count(),
            0
        );
        Ok(())
    }

    #[test]
    fn test_unseeded_sessions_reshuffle() {
        let dataset = corpus(200);
        let config = SamplerConfig::builder().batch_size(10).build().unwrap();
        let sampler = BatchSampler::new(&dataset, config).unwrap();
        let a = sampler.session();
        let b = sampler.session();
        assert_ne!(a.state().seed(), b.state().seed());
    }

    #[test]
    fn test_error_ends_session() {
        struct Failing;
        impl Dataset for Failing {
            fn len(&self) -> usize {
                10
            }
            fn get_one(&self, _: usize) -> Result<EncodedDocument> {
                Err(anyhow::anyhow!("disk gone"))
            }
            fn get_many(&self, _: &[usize]) -> Result<Vec<EncodedDocument>> {
                Err(anyhow::anyhow!("disk gone"))
            }
        }

        let dataset = Failing;
        let mut session = BatchSampler::new(&dataset, config(2, 10, Strategy::Batched))
            .unwrap()
            .session();
        assert!(session.next().unwrap().is_err());
        assert!(session.next().is_none());
    }

    #[test]
    fn test_works_through_trait_object() -> Result<()> {
        let dataset = corpus(8);
        let dynamic: &dyn Dataset = &dataset;
        let batches = BatchSampler::new(dynamic, config(4, 10, Strategy::Batched))?
            .session()
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(batches.len(), 2);
        Ok(())
    }

    #[test]
    fn test_rejects_zero_sized_config() {
        let dataset = corpus(10);
        let zero_batch = SamplerConfig {
            batch_size: 0,
            max_steps: 5,
            strategy: Strategy::Batched,
            seed: Some(1),
        };
        let err = BatchSampler::new(&dataset, zero_batch).err().unwrap();
        assert!(err.to_string().contains("batch_size must be > 0"));

        let zero_steps = SamplerConfig {
            batch_size: 2,
            max_steps: 0,
            strategy: Strategy::PerItem,
            seed: None,
        };
        assert!(BatchSampler::new(&dataset, zero_steps).is_err());
    }
}
