//! Templated file model
//!
//! A [`TemplatedFile`] pairs the raw (templated) source of a file with its
//! rendered output and two slice sequences:
//!
//! - `raw_sliced`: [`RawFileSlice`]s that exactly tile the raw source.
//! - `sliced_file`: [`TemplatedFileSlice`]s that exactly tile the rendered
//!   output, each pointing back at the raw slice(s) that produced it.
//!
//! Both tilings are validated on construction, so a `TemplatedFile` that
//! exists is always consistent.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Kind of a span of the raw source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawSliceKind {
    /// Plain text copied to the output
    Literal,

    /// `{{ expression }}` or a standalone statement (`set`, `do`, `include`, ...)
    Templated,

    /// `{# comment #}`
    Comment,

    /// Opening tag of a block (`if`, `for`, `macro`, ...)
    BlockStart,

    /// Intermediate tag of a block (`elif`, `else`)
    BlockMid,

    /// Closing tag of a block (`endif`, `endfor`, ...)
    BlockEnd,
}

/// A contiguous span of the raw source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileSlice {
    /// Source text of the span
    pub raw: String,

    pub slice_type: RawSliceKind,

    /// Byte offset of the span in the raw source
    pub source_idx: usize,

    /// Number of block boundaries crossed before this span
    pub block_idx: usize,
}

impl RawFileSlice {
    pub fn new(
        raw: impl Into<String>,
        slice_type: RawSliceKind,
        source_idx: usize,
        block_idx: usize,
    ) -> Self {
        Self {
            raw: raw.into(),
            slice_type,
            source_idx,
            block_idx,
        }
    }

    pub fn end_source_idx(&self) -> usize {
        self.source_idx + self.raw.len()
    }

    pub fn source_slice(&self) -> Range<usize> {
        self.source_idx..self.end_source_idx()
    }

    /// Whether this span only exists in the source (never in the output)
    pub fn is_source_only_slice(&self) -> bool {
        matches!(
            self.slice_type,
            RawSliceKind::Comment
                | RawSliceKind::BlockStart
                | RawSliceKind::BlockMid
                | RawSliceKind::BlockEnd
        )
    }
}

/// Kind of a span of the rendered output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplatedSliceKind {
    /// Raw text passed through unchanged
    Literal,

    /// Output produced by evaluating template code
    Templated,

    /// Template code consumed with zero output (tags, comments, skipped branches)
    Block,

    /// A later execution of a raw span already emitted once (loop iterations)
    Repeated,
}

/// Correspondence between a span of the output and span(s) of the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatedFileSlice {
    pub slice_type: TemplatedSliceKind,

    /// Byte range in the raw source
    pub source_slice: Range<usize>,

    /// Byte range in the rendered output
    pub templated_slice: Range<usize>,

    /// Indices into `TemplatedFile::raw_sliced`
    pub raw_indices: Vec<usize>,
}

impl TemplatedFileSlice {
    pub fn new(
        slice_type: TemplatedSliceKind,
        source_slice: Range<usize>,
        templated_slice: Range<usize>,
        raw_indices: Vec<usize>,
    ) -> Self {
        Self {
            slice_type,
            source_slice,
            templated_slice,
            raw_indices,
        }
    }

    pub fn is_zero_length(&self) -> bool {
        self.templated_slice.is_empty()
    }
}

/// Tiling violations detected while constructing a [`TemplatedFile`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplatedFileError {
    #[error("raw slice {index} starts at {found}, expected {expected}")]
    RawSliceGap { index: usize, expected: usize, found: usize },

    #[error("raw slice {index} does not match the source text at its position")]
    RawSliceMismatch { index: usize },

    #[error("raw slices cover {covered} bytes of a {len} byte source")]
    RawSliceIncomplete { covered: usize, len: usize },

    #[error("templated slice {index} starts at {found}, expected {expected}")]
    TemplatedSliceGap { index: usize, expected: usize, found: usize },

    #[error("templated slices cover {covered} bytes of a {len} byte output")]
    TemplatedSliceIncomplete { covered: usize, len: usize },

    #[error("templated slice {index} references invalid raw slice {raw_index}")]
    InvalidRawIndex { index: usize, raw_index: usize },

    #[error("templated slice {index} has a source range outside the source")]
    SourceSliceOutOfBounds { index: usize },
}

/// A rendered file together with its source correspondence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatedFile {
    /// The raw templated source
    pub source_str: String,

    /// The rendered output (`None` when rendering failed)
    pub templated_str: Option<String>,

    pub fname: String,

    pub raw_sliced: Vec<RawFileSlice>,

    pub sliced_file: Vec<TemplatedFileSlice>,
}

impl TemplatedFile {
    /// Build and validate a successfully rendered file
    pub fn new(
        source_str: impl Into<String>,
        fname: impl Into<String>,
        templated_str: impl Into<String>,
        sliced_file: Vec<TemplatedFileSlice>,
        raw_sliced: Vec<RawFileSlice>,
    ) -> Result<Self, TemplatedFileError> {
        let file = Self {
            source_str: source_str.into(),
            templated_str: Some(templated_str.into()),
            fname: fname.into(),
            raw_sliced,
            sliced_file,
        };
        file.validate()?;
        Ok(file)
    }

    /// A file whose rendering failed: only the source is available
    pub fn from_source(source_str: impl Into<String>, fname: impl Into<String>) -> Self {
        let source_str = source_str.into();
        let raw_sliced = if source_str.is_empty() {
            Vec::new()
        } else {
            vec![RawFileSlice::new(source_str.clone(), RawSliceKind::Literal, 0, 0)]
        };

        Self {
            source_str,
            templated_str: None,
            fname: fname.into(),
            raw_sliced,
            sliced_file: Vec::new(),
        }
    }

    pub fn templated_str(&self) -> Option<&str> {
        self.templated_str.as_deref()
    }

    /// Whether rendering succeeded
    pub fn is_rendered(&self) -> bool {
        self.templated_str.is_some()
    }

    fn validate(&self) -> Result<(), TemplatedFileError> {
        let mut pos = 0;
        for (index, slice) in self.raw_sliced.iter().enumerate() {
            if slice.source_idx != pos {
                return Err(TemplatedFileError::RawSliceGap {
                    index,
                    expected: pos,
                    found: slice.source_idx,
                });
            }
            if self.source_str.get(slice.source_slice()) != Some(slice.raw.as_str()) {
                return Err(TemplatedFileError::RawSliceMismatch { index });
            }
            pos = slice.end_source_idx();
        }
        if pos != self.source_str.len() {
            return Err(TemplatedFileError::RawSliceIncomplete {
                covered: pos,
                len: self.source_str.len(),
            });
        }

        let templated_len = self.templated_str.as_deref().map_or(0, str::len);
        let mut pos = 0;
        for (index, slice) in self.sliced_file.iter().enumerate() {
            if slice.templated_slice.start != pos || slice.templated_slice.end < pos {
                return Err(TemplatedFileError::TemplatedSliceGap {
                    index,
                    expected: pos,
                    found: slice.templated_slice.start,
                });
            }
            if let Some(&raw_index) = slice
                .raw_indices
                .iter()
                .find(|&&raw_index| raw_index >= self.raw_sliced.len())
            {
                return Err(TemplatedFileError::InvalidRawIndex { index, raw_index });
            }
            if slice.raw_indices.is_empty()
                || slice.source_slice.start > slice.source_slice.end
                || slice.source_slice.end > self.source_str.len()
            {
                return Err(TemplatedFileError::SourceSliceOutOfBounds { index });
            }
            pos = slice.templated_slice.end;
        }
        if pos != templated_len {
            return Err(TemplatedFileError::TemplatedSliceIncomplete {
                covered: pos,
                len: templated_len,
            });
        }

        Ok(())
    }

    /// 1-based (line, column) of a byte position in the source or the output
    pub fn get_line_pos_of_char_pos(&self, char_pos: usize, source: bool) -> (usize, usize) {
        let text = if source {
            self.source_str.as_str()
        } else {
            self.templated_str.as_deref().unwrap_or(&self.source_str)
        };
        let char_pos = char_pos.min(text.len());
        let before = &text.as_bytes()[..char_pos];
        let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        (line, char_pos - line_start + 1)
    }

    /// Map a byte range of the output back onto the source
    ///
    /// Inside a literal slice the mapping is exact; otherwise the range widens
    /// to the whole source span of every slice it touches.
    pub fn templated_slice_to_source_slice(&self, templated: Range<usize>) -> Range<usize> {
        if self.sliced_file.is_empty() {
            let end = templated.end.min(self.source_str.len());
            return templated.start.min(end)..end;
        }

        let touching: Vec<&TemplatedFileSlice> = if templated.is_empty() {
            self.sliced_file
                .iter()
                .filter(|s| {
                    s.templated_slice.start <= templated.start
                        && templated.start <= s.templated_slice.end
                })
                .collect()
        } else {
            self.sliced_file
                .iter()
                .filter(|s| {
                    s.templated_slice.start < templated.end
                        && templated.start < s.templated_slice.end
                })
                .collect()
        };

        let (Some(first), Some(last)) = (touching.first(), touching.last()) else {
            let end = self.source_str.len();
            return end..end;
        };

        let start = if is_one_to_one(first) {
            first.source_slice.start + templated.start.saturating_sub(first.templated_slice.start)
        } else {
            first.source_slice.start
        };
        let end = if is_one_to_one(last) {
            last.source_slice.start + templated.end.saturating_sub(last.templated_slice.start)
        } else {
            last.source_slice.end
        };

        start..end.max(start)
    }

    /// Raw slices overlapping a byte range of the source
    pub fn raw_slices_spanning_source_slice(&self, source: Range<usize>) -> &[RawFileSlice] {
        let first = self
            .raw_sliced
            .iter()
            .position(|s| s.end_source_idx() > source.start)
            .unwrap_or(self.raw_sliced.len());
        let last = self
            .raw_sliced
            .iter()
            .rposition(|s| s.source_idx < source.end.max(source.start + 1))
            .map_or(first, |p| p + 1)
            .max(first);
        &self.raw_sliced[first..last]
    }

    /// Whether a byte range of the source consists solely of literal text
    pub fn is_source_slice_literal(&self, source: Range<usize>) -> bool {
        if !self.is_rendered() {
            return true;
        }
        self.raw_slices_spanning_source_slice(source)
            .iter()
            .all(|s| s.slice_type == RawSliceKind::Literal)
    }

    /// Raw slices that never appear in the output (comments, block tags)
    pub fn source_only_slices(&self) -> Vec<&RawFileSlice> {
        self.raw_sliced
            .iter()
            .filter(|s| s.is_source_only_slice())
            .collect()
    }
}

fn is_one_to_one(slice: &TemplatedFileSlice) -> bool {
    matches!(
        slice.slice_type,
        TemplatedSliceKind::Literal | TemplatedSliceKind::Repeated
    ) && slice.templated_slice.len() == slice.source_slice.len()
}
