use crate::dataset::DataSource;
use crate::document::RawDocument;
use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

/// Line-by-line reader for a JSON-lines corpus, one [`RawDocument`] per line.
///
/// Blank lines are skipped. A line that is not a valid record yields an error
/// carrying its 1-based line number; the stream continues after it, so the
/// caller decides whether to abort.
///
/// # Example
/// ```ignore
/// let source = JsonlSource::new("brwac.jsonl");
/// for doc in source.stream()? {
///     let doc = doc?;
///     println!("{}: {:?}", doc.doc_id, doc.flat_sentences().map(|s| s.len()));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// # Arguments
    /// - `path`: Accepts `String`, `&str`, or `PathBuf`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource<RawDocument> for JsonlSource {
    fn stream(&self) -> Result<Box<dyn Iterator<Item = Result<RawDocument>> + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open corpus {}", self.path.display()))?;
        let path = self.path.clone();

        let iter = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(move |(line_num, line)| {
                let line = match line {
                    Ok(l) if l.trim().is_empty() => return None,
                    Ok(l) => l,
                    Err(e) => {
                        return Some(Err(anyhow::Error::new(e).context(format!(
                            "Failed to read line {} of {}",
                            line_num + 1,
                            path.display()
                        ))))
                    }
                };
                Some(serde_json::from_str::<RawDocument>(&line).with_context(|| {
                    format!("Invalid record at line {} of {}", line_num + 1, path.display())
                }))
            });
        Ok(Box::new(iter))
    }
}
