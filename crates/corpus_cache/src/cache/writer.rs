//! src/cache/writer.rs
//!
//! Append-only construction of a cache directory with an all-or-nothing commit.
//!
//! Rows are buffered into row groups and written to Parquet segment files in a
//! hidden staging directory next to the target. Nothing is visible at the
//! target path until [`CacheWriter::commit`] has written every segment and the
//! metadata file; dropping the writer (or any error before commit) deletes the
//! staging directory and leaves a previous cache at the target untouched.

use super::metadata::{CacheMetadata, SegmentInfo, COLUMN};
use crate::config::WriterConfig;
use crate::document::EncodedDocument;
use anyhow::{anyhow, ensure, Context, Result};
use arrow::array::{Array, ArrayRef, ListBuilder, UInt32Builder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Arrow type of the `encoded_sentences` column: `List<List<UInt32>>`.
pub(crate) fn encoded_sentences_type() -> DataType {
    ListBuilder::new(ListBuilder::new(UInt32Builder::new()))
        .finish()
        .data_type()
        .clone()
}

pub(crate) fn cache_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        COLUMN,
        encoded_sentences_type(),
        false,
    )]))
}

/// Builds a one-column record batch from a slice of documents.
pub(crate) fn to_record_batch(docs: &[EncodedDocument], schema: &SchemaRef) -> Result<RecordBatch> {
    let mut builder = ListBuilder::new(ListBuilder::new(UInt32Builder::new()));
    for doc in docs {
        for sentence in &doc.encoded_sentences {
            builder.values().values().append_slice(sentence);
            builder.values().append(true);
        }
        builder.append(true);
    }
    let array: ArrayRef = Arc::new(builder.finish());
    Ok(RecordBatch::try_new(schema.clone(), vec![array])?)
}

/// Summary of a committed cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub path: PathBuf,
    pub num_rows: usize,
    pub num_segments: usize,
}

struct OpenSegment {
    writer: ArrowWriter<File>,
    info: SegmentInfo,
}

/// Writes a new cache at `target`, replacing any prior cache there on commit.
///
/// # Example
/// ```ignore
/// let mut writer = CacheWriter::create("brwac/processed", WriterConfig::default())?;
/// for doc in encoded_docs {
///     writer.append(doc)?;
/// }
/// let summary = writer.commit()?;
/// ```
pub struct CacheWriter {
    target: PathBuf,
    staging: TempDir,
    config: WriterConfig,
    schema: SchemaRef,
    properties: WriterProperties,
    pending: Vec<EncodedDocument>,
    current: Option<OpenSegment>,
    segments: Vec<SegmentInfo>,
}

impl CacheWriter {
    pub fn create(target: impl Into<PathBuf>, config: WriterConfig) -> Result<Self> {
        config.validate()?;
        let target = target.into();
        ensure!(
            !target.is_file(),
            "Cache target {} is an existing file",
            target.display()
        );

        let parent = parent_dir(&target);
        fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let staging = tempfile::Builder::new()
            .prefix(".corpus-cache-staging-")
            .tempdir_in(&parent)
            .with_context(|| format!("Failed to create staging directory in {}", parent.display()))?;
        debug!(staging = %staging.path().display(), "Created cache staging directory");

        let properties = WriterProperties::builder()
            .set_max_row_group_size(config.rows_per_row_group)
            .set_compression(Compression::SNAPPY)
            .build();

        Ok(Self {
            target,
            staging,
            config,
            schema: cache_schema(),
            properties,
            pending: Vec::with_capacity(config.rows_per_row_group),
            current: None,
            segments: Vec::new(),
        })
    }

    /// Rows appended so far, including buffered ones.
    pub fn num_rows(&self) -> usize {
        self.committed_rows() + self.pending.len()
    }

    /// Staging directory holding the not-yet-committed segments.
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }

    fn committed_rows(&self) -> usize {
        let closed: usize = self.segments.iter().map(|s| s.num_rows).sum();
        closed + self.current.as_ref().map_or(0, |s| s.info.num_rows)
    }

    /// Rows the next row group should hold so it neither exceeds the row-group
    /// size nor overflows the current segment.
    fn row_group_target(&self) -> usize {
        let in_segment = self.current.as_ref().map_or(0, |s| s.info.num_rows);
        self.config
            .rows_per_row_group
            .min(self.config.rows_per_segment - in_segment)
    }

    pub fn append(&mut self, doc: EncodedDocument) -> Result<()> {
        self.pending.push(doc);
        if self.pending.len() >= self.row_group_target() {
            self.flush_row_group()?;
        }
        Ok(())
    }

    fn open_segment(&mut self) -> Result<OpenSegment> {
        let ordinal = self.segments.len();
        let file_name = SegmentInfo::segment_file_name(ordinal);
        let path = self.staging.path().join(&file_name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create segment {}", path.display()))?;
        let writer = ArrowWriter::try_new(file, self.schema.clone(), Some(self.properties.clone()))
            .with_context(|| format!("Failed to start Parquet writer for {}", path.display()))?;
        Ok(OpenSegment {
            writer,
            info: SegmentInfo::new(file_name, self.committed_rows()),
        })
    }

    fn flush_row_group(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.current.is_none() {
            let segment = self.open_segment()?;
            self.current = Some(segment);
        }
        let batch = to_record_batch(&self.pending, &self.schema)?;
        let rows = self.pending.len();

        let segment = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow!("No open segment"))?;
        segment.writer.write(&batch)?;
        segment.writer.flush()?;
        segment.info.push_row_group(rows);
        self.pending.clear();

        if segment.info.num_rows >= self.config.rows_per_segment {
            self.close_segment()?;
        }
        Ok(())
    }

    fn close_segment(&mut self) -> Result<()> {
        if let Some(segment) = self.current.take() {
            let file = segment
                .writer
                .into_inner()
                .with_context(|| format!("Failed to finish segment {}", segment.info.file))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync segment {}", segment.info.file))?;
            debug!(
                segment = %segment.info.file,
                rows = segment.info.num_rows,
                row_groups = segment.info.row_groups.len(),
                "Closed segment"
            );
            self.segments.push(segment.info);
        }
        Ok(())
    }

    /// Finishes all segments, writes the metadata and moves the cache into
    /// place, replacing whatever was at the target before.
    pub fn commit(mut self) -> Result<CommitSummary> {
        self.flush_row_group()?;
        self.close_segment()?;

        let metadata = CacheMetadata::new(std::mem::take(&mut self.segments));
        metadata.validate(self.staging.path())?;
        metadata.store(self.staging.path())?;

        replace_dir(self.staging.path(), &self.target)?;
        // The staging path no longer exists; dropping the handle is a no-op.
        drop(self.staging);

        info!(
            path = %self.target.display(),
            rows = metadata.num_rows,
            segments = metadata.segments.len(),
            "Committed cache"
        );
        Ok(CommitSummary {
            path: self.target,
            num_rows: metadata.num_rows,
            num_segments: metadata.segments.len(),
        })
    }
}

/// Directory that holds `target`, `.` for a bare relative name.
fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Moves `staged` to `target`. A prior directory at `target` is first moved
/// into a uniquely named holder beside it and deleted only after the new one
/// is in place.
///
/// Once `staged` is at `target` the commit has happened: failing to delete
/// the previous cache is logged, not returned.
fn replace_dir(staged: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        return fs::rename(staged, target).with_context(|| {
            format!("Failed to move {} to {}", staged.display(), target.display())
        });
    }

    let parent = parent_dir(target);
    let holder = tempfile::Builder::new()
        .prefix(".corpus-cache-retired-")
        .tempdir_in(&parent)
        .with_context(|| format!("Failed to create retirement directory in {}", parent.display()))?;
    let retired = holder.path().join("previous");
    fs::rename(target, &retired)
        .with_context(|| format!("Failed to move aside {}", target.display()))?;

    if let Err(e) = fs::rename(staged, target) {
        let err = anyhow::Error::new(e).context(format!(
            "Failed to move {} to {}",
            staged.display(),
            target.display()
        ));
        return match fs::rename(&retired, target) {
            Ok(()) => Err(err),
            Err(restore) => {
                let kept = holder.keep().join("previous");
                Err(err.context(format!(
                    "previous cache could not be restored to {} ({}); it remains at {}",
                    target.display(),
                    restore,
                    kept.display()
                )))
            }
        };
    }

    let holder_path = holder.path().to_path_buf();
    if let Err(e) = holder.close() {
        warn!(
            path = %holder_path.display(),
            error = %e,
            "Committed cache but failed to delete the previous one"
        );
    }
    Ok(())
}
