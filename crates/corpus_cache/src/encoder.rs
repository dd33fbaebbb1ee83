//! src/encoder.rs
//!
//! Turns raw documents into per-sentence token-id sequences.
//!
//! The tokenizer is an external collaborator behind [`SentenceTokenizer`].
//! [`HfTokenizer`] adapts a HuggingFace [`tokenizers::Tokenizer`]; tests can
//! plug in any deterministic implementation.

use crate::config::{EncoderConfig, TokenizerSource};
use crate::document::{EncodedDocument, RawDocument};
use crate::error::CacheError;
use crate::transform::Transform;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use tokenizers::Tokenizer;

/// Maps an ordered batch of sentences to one token-id sequence per sentence,
/// in input order. Must be deterministic for a fixed configuration.
pub trait SentenceTokenizer: Send + Sync {
    fn encode_batch(&self, sentences: &[&str]) -> Result<Vec<Vec<u32>>>;
}

/// ===========================================================================
/// HuggingFace tokenizer adapter.
///
/// # Arguments
/// - `lowercase`: lowercase every sentence before encoding. Leave `false` for
///   cased vocabularies.
/// - `add_special_tokens`: let the tokenizer's post-processor add markers such
///   as `[CLS]`/`[SEP]` around each sentence.
///
/// # Example
/// ```ignore
/// let config = EncoderConfig::pretrained("neuralmind/bert-large-portuguese-cased");
/// let tokenizer = HfTokenizer::from_config(&config)?;
/// let ids = tokenizer.encode_batch(&["Olá mundo", "Tudo bem?"])?;
/// ```
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    lowercase: bool,
    add_special_tokens: bool,
}

impl HfTokenizer {
    pub fn new(tokenizer: Tokenizer, lowercase: bool, add_special_tokens: bool) -> Self {
        Self {
            tokenizer,
            lowercase,
            add_special_tokens,
        }
    }

    /// Loads the tokenizer named by `config`, from a local `tokenizer.json` or
    /// from the HuggingFace hub.
    pub fn from_config(config: &EncoderConfig) -> Result<Self> {
        let tokenizer = match &config.tokenizer {
            TokenizerSource::File(path) => Tokenizer::from_file(path).map_err(|e| {
                anyhow!("Failed to load tokenizer from {}: {}", path.display(), e)
            })?,
            TokenizerSource::Pretrained(identifier) => {
                Tokenizer::from_pretrained(identifier, None).map_err(|e| {
                    anyhow!("Failed to load pretrained tokenizer '{}': {}", identifier, e)
                })?
            }
        };
        Ok(Self::new(
            tokenizer,
            config.lowercase,
            config.add_special_tokens,
        ))
    }

    /// Parses a serialized `tokenizer.json` definition.
    pub fn from_json(json: &str, lowercase: bool, add_special_tokens: bool) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_str(json).map_err(|e| anyhow!("Invalid tokenizer definition: {}", e))?;
        Ok(Self::new(tokenizer, lowercase, add_special_tokens))
    }
}

impl SentenceTokenizer for HfTokenizer {
    fn encode_batch(&self, sentences: &[&str]) -> Result<Vec<Vec<u32>>> {
        let inputs: Vec<String> = if self.lowercase {
            sentences.iter().map(|s| s.to_lowercase()).collect()
        } else {
            sentences.iter().map(|s| s.to_string()).collect()
        };
        let encodings = self
            .tokenizer
            .encode_batch(inputs, self.add_special_tokens)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        Ok(encodings
            .into_iter()
            .map(|encoding| encoding.get_ids().to_vec())
            .collect())
    }
}

/// ===========================================================================
/// Encodes a [`RawDocument`] into an [`EncodedDocument`].
///
/// All paragraphs are flattened into a single sentence sequence and passed to
/// the tokenizer in one batched call per document. Title, URI and id are not
/// carried over.
///
/// # Errors
/// - [`CacheError::MalformedDocument`] if the record has no
///   `paragraphs.sentences` structure.
/// - Tokenizer failures, or a tokenizer that returns a different number of
///   sequences than it was given.
pub struct Encoder<T> {
    tokenizer: T,
}

impl<T: SentenceTokenizer> Encoder<T> {
    pub fn new(tokenizer: T) -> Self {
        Self { tokenizer }
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn encode(&self, doc: &RawDocument) -> Result<EncodedDocument> {
        let sentences = doc.flat_sentences().ok_or_else(|| CacheError::MalformedDocument {
            doc_id: doc.doc_id.clone(),
            reason: "missing paragraphs.sentences".to_string(),
        })?;
        if sentences.is_empty() {
            return Ok(EncodedDocument::default());
        }

        let encoded_sentences = self.tokenizer.encode_batch(&sentences)?;
        if encoded_sentences.len() != sentences.len() {
            return Err(anyhow!(
                "Tokenizer returned {} sequences for {} sentences in document '{}'",
                encoded_sentences.len(),
                sentences.len(),
                doc.doc_id
            ));
        }
        Ok(EncodedDocument::new(encoded_sentences))
    }
}

impl<T: SentenceTokenizer> Transform<RawDocument, EncodedDocument> for Encoder<T> {
    fn apply(&self, doc: RawDocument) -> Result<EncodedDocument> {
        self.encode(&doc)
    }
}

/// ===========================================================================
/// Drops documents with `min_sentences` or fewer sentences.
///
/// The default threshold of one removes single-sentence documents, which carry
/// no intra-document context.
#[derive(Debug, Clone, Copy)]
pub struct MinSentenceFilter {
    min_sentences: usize,
}

impl Default for MinSentenceFilter {
    fn default() -> Self {
        Self { min_sentences: 1 }
    }
}

impl MinSentenceFilter {
    pub fn new(min_sentences: usize) -> Self {
        Self { min_sentences }
    }

    pub fn keeps(&self, doc: &EncodedDocument) -> bool {
        doc.num_sentences() > self.min_sentences
    }
}

impl Transform<EncodedDocument, Option<EncodedDocument>> for MinSentenceFilter {
    fn apply(&self, doc: EncodedDocument) -> Result<Option<EncodedDocument>> {
        Ok(self.keeps(&doc).then_some(doc))
    }
}
