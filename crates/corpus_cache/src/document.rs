use serde::{Deserialize, Serialize};

/// A raw corpus record.
///
/// Mirrors the source layout:
/// ```text
/// {
///   "doc_id": "netg-1afc73",
///   "title": "...",
///   "uri": "http://...",
///   "paragraphs": { "sentences": [["text", "text"], ...] }
/// }
/// ```
/// `paragraphs.sentences` holds one list of sentences per paragraph. Both
/// levels are optional at parse time so that a record missing them reaches the
/// [`Encoder`](crate::encoder::Encoder), which rejects it as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    pub doc_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub paragraphs: Option<Paragraphs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraphs {
    #[serde(default)]
    pub sentences: Option<Vec<Vec<String>>>,
}

impl RawDocument {
    /// Builds a well-formed document from per-paragraph sentence lists.
    pub fn new(doc_id: impl Into<String>, paragraphs: Vec<Vec<String>>) -> Self {
        Self {
            doc_id: doc_id.into(),
            title: String::new(),
            uri: String::new(),
            paragraphs: Some(Paragraphs {
                sentences: Some(paragraphs),
            }),
        }
    }

    /// Paragraphs flattened into one ordered sentence sequence, or `None` if the
    /// record carries no paragraph/sentence structure.
    pub fn flat_sentences(&self) -> Option<Vec<&str>> {
        let paragraphs = self.paragraphs.as_ref()?.sentences.as_ref()?;
        Some(
            paragraphs
                .iter()
                .flat_map(|paragraph| paragraph.iter().map(String::as_str))
                .collect(),
        )
    }
}

/// A document reduced to one token-id sequence per sentence.
///
/// Paragraph boundaries are not kept. Documents stored in a committed cache
/// always have more than one sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodedDocument {
    pub encoded_sentences: Vec<Vec<u32>>,
}

impl EncodedDocument {
    pub fn new(encoded_sentences: Vec<Vec<u32>>) -> Self {
        Self { encoded_sentences }
    }

    pub fn num_sentences(&self) -> usize {
        self.encoded_sentences.len()
    }

    pub fn num_tokens(&self) -> usize {
        self.encoded_sentences.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_keeps_sentence_order_across_paragraphs() {
        let doc = RawDocument::new(
            "d1",
            vec![
                vec!["a".into(), "b".into()],
                vec![],
                vec!["c".into(), "".into()],
            ],
        );
        assert_eq!(doc.flat_sentences(), Some(vec!["a", "b", "c", ""]));
    }

    #[test]
    fn test_missing_structure_is_none() -> anyhow::Result<()> {
        let doc: RawDocument = serde_json::from_str(r#"{"doc_id": "x", "title": "t"}"#)?;
        assert!(doc.flat_sentences().is_none());

        let doc: RawDocument = serde_json::from_str(r#"{"doc_id": "y", "paragraphs": {}}"#)?;
        assert!(doc.flat_sentences().is_none());
        Ok(())
    }

    #[test]
    fn test_parse_source_layout() -> anyhow::Result<()> {
        let line = r#"{"doc_id": "netg-1afc73", "title": "T", "uri": "http://x",
                       "paragraphs": {"sentences": [["one", "two"], ["three"]]}}"#;
        let doc: RawDocument = serde_json::from_str(line)?;
        assert_eq!(doc.doc_id, "netg-1afc73");
        assert_eq!(doc.flat_sentences().map(|s| s.len()), Some(3));
        Ok(())
    }

    #[test]
    fn test_encoded_counts() {
        let doc = EncodedDocument::new(vec![vec![1, 2], vec![], vec![3]]);
        assert_eq!(doc.num_sentences(), 3);
        assert_eq!(doc.num_tokens(), 3);
    }
}
