use crate::document::EncodedDocument;
use crate::error::CacheError;
use anyhow::Result;
use std::sync::Arc;

/// A streaming source of raw records (e.g. a JSONL corpus file).
///
/// `stream()` may be called more than once; each call starts from the
/// beginning. Per-record errors are yielded in place.
pub trait DataSource<T>: Send + Sync {
    fn stream(&self) -> Result<Box<dyn Iterator<Item = Result<T>> + Send>>;
}

/// Random access to an ordered collection of [`EncodedDocument`]s.
///
/// Implementations must be `Send + Sync` so several sampling sessions can read
/// the same dataset concurrently.
pub trait Dataset: Send + Sync {
    /// Total number of documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes one document.
    ///
    /// # Errors
    /// [`CacheError::IndexOutOfRange`] if `index >= len()`.
    fn get_one(&self, index: usize) -> Result<EncodedDocument>;

    /// Materializes the requested documents in request order.
    ///
    /// # Errors
    /// [`CacheError::IndexOutOfRange`] if any index is `>= len()`; nothing is
    /// returned in that case.
    fn get_many(&self, indices: &[usize]) -> Result<Vec<EncodedDocument>>;
}

/// Checks every index against `len`, reporting the first offender.
pub(crate) fn check_indices(indices: &[usize], len: usize) -> Result<()> {
    match indices.iter().find(|&&index| index >= len) {
        Some(&index) => Err(CacheError::IndexOutOfRange { index, len }.into()),
        None => Ok(()),
    }
}

/// A dataset held entirely in memory behind an `Arc<[EncodedDocument]>`.
///
/// Cloning only bumps the reference count. Suitable for small corpora and for
/// exercising samplers without touching disk.
#[derive(Debug, Clone)]
pub struct InMemoryCorpus {
    documents: Arc<[EncodedDocument]>,
}

impl InMemoryCorpus {
    pub fn new(documents: Vec<EncodedDocument>) -> Self {
        Self {
            documents: documents.into(),
        }
    }

    pub fn documents(&self) -> &[EncodedDocument] {
        &self.documents
    }
}

impl Dataset for InMemoryCorpus {
    fn len(&self) -> usize {
        self.documents.len()
    }

    fn get_one(&self, index: usize) -> Result<EncodedDocument> {
        check_indices(&[index], self.len())?;
        Ok(self.documents[index].clone())
    }

    fn get_many(&self, indices: &[usize]) -> Result<Vec<EncodedDocument>> {
        check_indices(indices, self.len())?;
        Ok(indices.iter().map(|&i| self.documents[i].clone()).collect())
    }
}
