//! src/cache/metadata.rs
//!
//! The small JSON index stored next to the segment files.
//!
//! ```text
//! cache_dir/
//! ├── cache_meta.json         # row count + segment layout (this module)
//! ├── segment-00000.parquet   # rows [0, n0)
//! ├── segment-00001.parquet   # rows [n0, n0 + n1)
//! └── ...
//! ```
//!
//! Opening a cache reads only this file, so any row can be located without
//! touching segment contents.

use crate::error::CacheError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

pub const METADATA_FILE: &str = "cache_meta.json";
pub const FORMAT_VERSION: u32 = 1;
/// Name of the single column holding `List<List<UInt32>>` token ids.
pub const COLUMN: &str = "encoded_sentences";

/// One immutable segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// File name relative to the cache directory.
    pub file: String,
    /// Global index of the segment's first row.
    pub row_start: usize,
    pub num_rows: usize,
    /// Rows in each Parquet row group, in file order.
    pub row_groups: Vec<usize>,
    /// Exclusive end offset of each row group. Rebuilt on load.
    #[serde(skip)]
    row_group_ends: Vec<usize>,
}

impl SegmentInfo {
    /// An empty segment starting at global row `row_start`.
    pub fn new(file: impl Into<String>, row_start: usize) -> Self {
        Self {
            file: file.into(),
            row_start,
            num_rows: 0,
            row_groups: Vec::new(),
            row_group_ends: Vec::new(),
        }
    }

    pub fn from_row_groups(file: impl Into<String>, row_start: usize, row_groups: &[usize]) -> Self {
        let mut info = Self::new(file, row_start);
        for &rows in row_groups {
            info.push_row_group(rows);
        }
        info
    }

    pub fn segment_file_name(ordinal: usize) -> String {
        format!("segment-{ordinal:05}.parquet")
    }

    /// Records a row group of `rows` rows appended to the segment.
    pub fn push_row_group(&mut self, rows: usize) {
        self.num_rows += rows;
        self.row_groups.push(rows);
        self.row_group_ends.push(self.num_rows);
    }

    fn index_row_groups(&mut self) {
        self.row_group_ends = self
            .row_groups
            .iter()
            .scan(0, |end, &rows| {
                *end += rows;
                Some(*end)
            })
            .collect();
    }

    /// Maps a row offset within this segment to `(row_group, offset_in_group)`.
    pub fn row_group_of(&self, offset: usize) -> Option<(usize, usize)> {
        let group = self.row_group_ends.partition_point(|&end| end <= offset);
        let end = *self.row_group_ends.get(group)?;
        Some((group, offset + self.row_groups[group] - end))
    }
}

/// Position of a row inside the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    pub segment: usize,
    /// Offset from the start of the segment.
    pub offset: usize,
    pub row_group: usize,
    /// Offset from the start of the row group.
    pub offset_in_group: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub format_version: u32,
    pub column: String,
    pub num_rows: usize,
    pub segments: Vec<SegmentInfo>,
}

impl CacheMetadata {
    pub fn new(segments: Vec<SegmentInfo>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            column: COLUMN.to_string(),
            num_rows: segments.iter().map(|s| s.num_rows).sum(),
            segments,
        }
    }

    /// Reads and validates `cache_meta.json` from `dir`.
    ///
    /// # Errors
    /// - [`CacheError::CacheNotFound`] if `dir` or its metadata file is missing
    /// - [`CacheError::CacheCorrupt`] if the metadata cannot be parsed or
    ///   disagrees with itself or with the files present
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CacheError::CacheNotFound(dir.to_path_buf()).into());
        }
        let meta_path = dir.join(METADATA_FILE);
        let bytes = match fs::read(&meta_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::CacheNotFound(dir.to_path_buf()).into())
            }
            Err(e) => {
                return Err(CacheError::corrupt(dir, format!("unreadable metadata: {e}")).into())
            }
        };
        let mut metadata: Self = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::corrupt(dir, format!("invalid metadata: {e}")))?;
        metadata
            .segments
            .iter_mut()
            .for_each(SegmentInfo::index_row_groups);
        metadata.validate(dir)?;
        Ok(metadata)
    }

    /// Writes the metadata file into `dir` and syncs it.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let meta_path = dir.join(METADATA_FILE);
        let file = File::create(&meta_path)
            .with_context(|| format!("Failed to create {}", meta_path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()
            .with_context(|| format!("Failed to sync {}", meta_path.display()))?;
        Ok(())
    }

    /// Checks internal consistency and that every segment file exists.
    pub fn validate(&self, dir: &Path) -> Result<()> {
        let corrupt = |reason: String| -> anyhow::Error { CacheError::corrupt(dir, reason).into() };

        if self.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.column != COLUMN {
            return Err(corrupt(format!("unexpected column '{}'", self.column)));
        }

        let mut expected_start = 0;
        for segment in &self.segments {
            if segment.row_start != expected_start {
                return Err(corrupt(format!(
                    "segment {} starts at row {}, expected {}",
                    segment.file, segment.row_start, expected_start
                )));
            }
            let grouped: usize = segment.row_groups.iter().sum();
            if grouped != segment.num_rows || segment.row_groups.contains(&0) {
                return Err(corrupt(format!(
                    "segment {} row groups {:?} do not add up to {} rows",
                    segment.file, segment.row_groups, segment.num_rows
                )));
            }
            if !dir.join(&segment.file).is_file() {
                return Err(corrupt(format!("segment file {} is missing", segment.file)));
            }
            expected_start += segment.num_rows;
        }
        if expected_start != self.num_rows {
            return Err(corrupt(format!(
                "segments hold {} rows but metadata records {}",
                expected_start, self.num_rows
            )));
        }
        Ok(())
    }

    /// Locates a global row index, or `None` if it is out of range.
    pub fn locate(&self, index: usize) -> Option<RowLocation> {
        if index >= self.num_rows {
            return None;
        }
        let segment = self
            .segments
            .partition_point(|s| s.row_start + s.num_rows <= index);
        let info = self.segments.get(segment)?;
        let offset = index - info.row_start;
        let (row_group, offset_in_group) = info.row_group_of(offset)?;
        Some(RowLocation {
            segment,
            offset,
            row_group,
            offset_in_group,
        })
    }
}
