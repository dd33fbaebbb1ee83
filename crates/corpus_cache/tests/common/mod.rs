//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use corpus_cache::{
    CorpusTransform, Encoder, PipelineReport, RawDocument, SentenceTokenizer, WriterConfig,
};

use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Whitespace tokenizer: `[CLS] word... [SEP]`, each word mapped to the sum
/// of its bytes offset past the special ids.
pub struct WhitespaceTokenizer;

pub const CLS: u32 = 1;
pub const SEP: u32 = 2;

impl WhitespaceTokenizer {
    pub fn encode(sentence: &str) -> Vec<u32> {
        let mut ids = vec![CLS];
        ids.extend(
            sentence
                .split_whitespace()
                .map(|word| 10 + word.bytes().map(u32::from).sum::<u32>()),
        );
        ids.push(SEP);
        ids
    }
}

impl SentenceTokenizer for WhitespaceTokenizer {
    fn encode_batch(&self, sentences: &[&str]) -> Result<Vec<Vec<u32>>> {
        Ok(sentences.iter().map(|s| Self::encode(s)).collect())
    }
}

/// A document with `sentences` sentences split over two paragraphs.
pub fn raw_doc(id: usize, sentences: usize) -> RawDocument {
    let all: Vec<String> = (0..sentences)
        .map(|s| format!("documento {id} frase {s}"))
        .collect();
    let (first, second) = all.split_at(sentences / 2);
    RawDocument::new(format!("doc-{id}"), vec![first.to_vec(), second.to_vec()])
}

/// Token ids the pipeline should store for `doc`.
pub fn expected_encoding(doc: &RawDocument) -> Vec<Vec<u32>> {
    doc.flat_sentences()
        .unwrap_or_default()
        .into_iter()
        .map(WhitespaceTokenizer::encode)
        .collect()
}

/// Writes `docs` as a JSON-lines corpus at `dir/corpus.jsonl`.
pub fn write_corpus(dir: &Path, docs: &[RawDocument]) -> Result<PathBuf> {
    let path = dir.join("corpus.jsonl");
    let mut out = BufWriter::new(File::create(&path)?);
    for doc in docs {
        serde_json::to_writer(&mut out, doc)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(path)
}

/// Small segments and row groups so every test cache spans several of each.
pub fn small_writer_config() -> WriterConfig {
    WriterConfig {
        rows_per_segment: 10,
        rows_per_row_group: 4,
    }
}

/// Runs the whole pipeline over documents with the given sentence counts.
pub fn build_cache(
    target: &Path,
    sentence_counts: &[usize],
    config: WriterConfig,
) -> Result<(Vec<RawDocument>, PipelineReport)> {
    let docs: Vec<RawDocument> = sentence_counts
        .iter()
        .enumerate()
        .map(|(i, &n)| raw_doc(i, n))
        .collect();
    let corpus_dir = tempfile::TempDir::new()?;
    let corpus = write_corpus(corpus_dir.path(), &docs)?;
    let report = CorpusTransform::new(Encoder::new(WhitespaceTokenizer))
        .with_writer_config(config)
        .run(&corpus_cache::JsonlSource::new(corpus), target)?;
    Ok((docs, report))
}

/// A cache of `rows` documents, all of which survive the filter.
pub fn cache_with_rows(target: &Path, rows: usize) -> Result<Vec<RawDocument>> {
    let counts: Vec<usize> = (0..rows).map(|i| 2 + i % 4).collect();
    let (docs, _) = build_cache(target, &counts, small_writer_config())?;
    Ok(docs)
}
