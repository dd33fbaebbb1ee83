//! src/cache/reader.rs
//!
//! Read-only access to a committed cache.
//!
//! Two access modes with the same results but different cost profiles:
//!
//! - [`CorpusCache::get_one`] decodes the whole row group that holds the row and
//!   keeps the decoded row group on the handle until the handle is dropped or
//!   [`CorpusCache::release_retained`] is called. Over a long random session
//!   the retained set grows towards the full corpus, so memory grows with the
//!   number of fetches.
//! - [`CorpusCache::get_many`] reads exactly the requested rows with a Parquet
//!   row selection and retains nothing; its memory is bounded by the request.

use super::metadata::{CacheMetadata, RowLocation, SegmentInfo, COLUMN};
use crate::dataset::{check_indices, Dataset};
use crate::document::EncodedDocument;
use crate::error::CacheError;
use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::datatypes::UInt32Type;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReaderBuilder, RowSelection, RowSelector};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

type RowGroupKey = (usize, usize);

/// Handle on a committed cache directory.
///
/// Opening reads only `cache_meta.json`. The handle is `Send + Sync`; any
/// number of handles, in any number of processes, may read the same directory.
pub struct CorpusCache {
    root: PathBuf,
    metadata: CacheMetadata,
    retained: Mutex<HashMap<RowGroupKey, Arc<Vec<EncodedDocument>>>>,
}

impl std::fmt::Debug for CorpusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusCache")
            .field("root", &self.root)
            .field("num_rows", &self.metadata.num_rows)
            .field("segments", &self.metadata.segments.len())
            .finish()
    }
}

impl CorpusCache {
    /// Attaches to the cache at `path` without reading any document.
    ///
    /// # Errors
    /// - [`CacheError::CacheNotFound`] if the path or its metadata is missing
    /// - [`CacheError::CacheCorrupt`] if the metadata is unreadable or references
    ///   missing segment files
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let metadata = CacheMetadata::load(&root)?;
        info!(
            path = %root.display(),
            rows = metadata.num_rows,
            segments = metadata.segments.len(),
            "Opened cache"
        );
        Ok(Self {
            root,
            metadata,
            retained: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &CacheMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.metadata.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes a single row.
    ///
    /// Decodes and retains the row's whole row group; see the module docs.
    pub fn get_one(&self, index: usize) -> Result<EncodedDocument> {
        let loc = self.locate(index)?;
        let key = (loc.segment, loc.row_group);

        let cached = self.lock_retained()?.get(&key).cloned();
        let rows = match cached {
            Some(rows) => rows,
            None => {
                let decoded = Arc::new(self.read_row_group(loc.segment, loc.row_group)?);
                self.lock_retained()?
                    .entry(key)
                    .or_insert(decoded)
                    .clone()
            }
        };
        rows.get(loc.offset_in_group).cloned().ok_or_else(|| {
            CacheError::corrupt(
                &self.root,
                format!("row group {:?} is shorter than recorded", key),
            )
            .into()
        })
    }

    /// Materializes the requested rows, in request order.
    ///
    /// Only the row groups containing requested rows are read, and only the
    /// requested rows are decoded. Duplicate indices yield duplicate documents.
    pub fn get_many(&self, indices: &[usize]) -> Result<Vec<EncodedDocument>> {
        check_indices(indices, self.len())?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let mut wanted = indices.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        // Decode in ascending index order, one segment at a time.
        let mut decoded: Vec<Option<EncodedDocument>> = Vec::with_capacity(wanted.len());
        let mut start = 0;
        while start < wanted.len() {
            let segment = self.locate(wanted[start])?.segment;
            let info = &self.metadata.segments[segment];
            let end_row = info.row_start + info.num_rows;
            let end = start + wanted[start..].partition_point(|&i| i < end_row);

            let offsets: Vec<usize> = wanted[start..end]
                .iter()
                .map(|&i| i - info.row_start)
                .collect();
            let rows = self.read_selected(segment, &offsets)?;
            decoded.extend(rows.into_iter().map(Some));
            start = end;
        }

        // Hand out owned documents in request order, cloning only duplicates.
        let mut remaining = vec![0usize; wanted.len()];
        let positions: Vec<usize> = indices
            .iter()
            .map(|i| wanted.binary_search(i).map_err(|_| anyhow!("index {i} not decoded")))
            .collect::<Result<_>>()?;
        for &p in &positions {
            remaining[p] += 1;
        }
        positions
            .into_iter()
            .map(|p| {
                remaining[p] -= 1;
                let slot = &mut decoded[p];
                let doc = if remaining[p] == 0 {
                    slot.take()
                } else {
                    slot.clone()
                };
                doc.ok_or_else(|| anyhow!("row {} missing from decoded batch", wanted[p]))
            })
            .collect()
    }

    /// The first document, if any. Retains nothing.
    pub fn first(&self) -> Result<Option<EncodedDocument>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(self.get_many(&[0])?.pop())
    }

    /// Number of rows currently held by the `get_one` row-group memo.
    pub fn retained_rows(&self) -> usize {
        self.retained
            .lock()
            .map(|memo| memo.values().map(|rows| rows.len()).sum())
            .unwrap_or(0)
    }

    /// Drops every row group retained by `get_one`.
    pub fn release_retained(&self) -> Result<()> {
        self.lock_retained()?.clear();
        Ok(())
    }

    fn lock_retained(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<RowGroupKey, Arc<Vec<EncodedDocument>>>>> {
        self.retained
            .lock()
            .map_err(|_| anyhow!("Row-group memo lock poisoned"))
    }

    fn locate(&self, index: usize) -> Result<RowLocation> {
        self.metadata.locate(index).ok_or_else(|| {
            CacheError::IndexOutOfRange {
                index,
                len: self.len(),
            }
            .into()
        })
    }

    fn segment(&self, segment: usize) -> &SegmentInfo {
        &self.metadata.segments[segment]
    }

    fn open_segment(&self, segment: usize) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        let path = self.root.join(&self.segment(segment).file);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open segment {}", path.display()))?;
        ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| CacheError::corrupt(&path, format!("not a valid Parquet segment: {e}")).into())
    }

    /// Decodes every row of one row group.
    fn read_row_group(&self, segment: usize, row_group: usize) -> Result<Vec<EncodedDocument>> {
        let expected = self.segment(segment).row_groups[row_group];
        let reader = self
            .open_segment(segment)?
            .with_row_groups(vec![row_group])
            .with_batch_size(expected)
            .build()?;

        let mut docs = Vec::with_capacity(expected);
        for batch in reader {
            decode_batch(&batch?, &mut docs).map_err(|e| self.corrupt_segment(segment, e))?;
        }
        if docs.len() != expected {
            return Err(self.corrupt_segment(
                segment,
                anyhow!("row group {} holds {} rows, expected {}", row_group, docs.len(), expected),
            ));
        }
        debug!(segment, row_group, rows = expected, "Decoded row group");
        Ok(docs)
    }

    /// Decodes the rows at the given ascending, distinct segment offsets.
    fn read_selected(&self, segment: usize, offsets: &[usize]) -> Result<Vec<EncodedDocument>> {
        let info = self.segment(segment);
        let (row_groups, selectors) = plan_selection(info, offsets)?;
        let reader = self
            .open_segment(segment)?
            .with_row_groups(row_groups)
            .with_row_selection(RowSelection::from(selectors))
            .with_batch_size(offsets.len())
            .build()?;

        let mut docs = Vec::with_capacity(offsets.len());
        for batch in reader {
            decode_batch(&batch?, &mut docs).map_err(|e| self.corrupt_segment(segment, e))?;
        }
        if docs.len() != offsets.len() {
            return Err(self.corrupt_segment(
                segment,
                anyhow!("selected {} rows, decoded {}", offsets.len(), docs.len()),
            ));
        }
        Ok(docs)
    }

    fn corrupt_segment(&self, segment: usize, err: anyhow::Error) -> anyhow::Error {
        CacheError::corrupt(
            self.root.join(&self.segment(segment).file),
            format!("{err:#}"),
        )
        .into()
    }
}

impl Dataset for CorpusCache {
    fn len(&self) -> usize {
        CorpusCache::len(self)
    }

    fn get_one(&self, index: usize) -> Result<EncodedDocument> {
        CorpusCache::get_one(self, index)
    }

    fn get_many(&self, indices: &[usize]) -> Result<Vec<EncodedDocument>> {
        CorpusCache::get_many(self, indices)
    }
}

/// Builds the row groups to read and a selection over their concatenated rows
/// that picks exactly `offsets` (ascending, distinct, within the segment).
fn plan_selection(info: &SegmentInfo, offsets: &[usize]) -> Result<(Vec<usize>, Vec<RowSelector>)> {
    let mut row_groups: Vec<usize> = Vec::new();
    let mut selectors: Vec<RowSelector> = Vec::new();
    // Position within the concatenation of the chosen row groups.
    let mut position = 0;
    // End of the last chosen row group within that concatenation.
    let mut group_end = 0;
    let mut group_base = 0;

    for &offset in offsets {
        let (group, in_group) = info
            .row_group_of(offset)
            .ok_or_else(|| anyhow!("offset {} outside segment {}", offset, info.file))?;
        if row_groups.last() != Some(&group) {
            push_selector(&mut selectors, false, group_end - position);
            position = group_end;
            group_base = group_end;
            group_end += info.row_groups[group];
            row_groups.push(group);
        }
        let target = group_base + in_group;
        push_selector(&mut selectors, false, target - position);
        push_selector(&mut selectors, true, 1);
        position = target + 1;
    }
    push_selector(&mut selectors, false, group_end - position);
    Ok((row_groups, selectors))
}

fn push_selector(selectors: &mut Vec<RowSelector>, select: bool, rows: usize) {
    if rows == 0 {
        return;
    }
    match selectors.last_mut() {
        Some(last) if last.skip != select => last.row_count += rows,
        _ => selectors.push(if select {
            RowSelector::select(rows)
        } else {
            RowSelector::skip(rows)
        }),
    }
}

/// Appends the documents of one record batch to `out`.
fn decode_batch(batch: &RecordBatch, out: &mut Vec<EncodedDocument>) -> Result<()> {
    let column = batch
        .column_by_name(COLUMN)
        .ok_or_else(|| anyhow!("column '{}' not found", COLUMN))?;
    let docs = column
        .as_list_opt::<i32>()
        .ok_or_else(|| anyhow!("column '{}' is not a list", COLUMN))?;

    for row in 0..docs.len() {
        let sentences_array = docs.value(row);
        let sentences = sentences_array
            .as_list_opt::<i32>()
            .ok_or_else(|| anyhow!("row {} is not a list of sentences", row))?;
        let mut encoded = Vec::with_capacity(sentences.len());
        for sentence in 0..sentences.len() {
            let ids_array = sentences.value(sentence);
            let ids = ids_array
                .as_primitive_opt::<UInt32Type>()
                .ok_or_else(|| anyhow!("row {} sentence {} is not UInt32", row, sentence))?;
            encoded.push(ids.values().to_vec());
        }
        out.push(EncodedDocument::new(encoded));
    }
    Ok(())
}
