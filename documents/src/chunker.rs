//! Overlapping document chunking.
//!
//! Text is cut into passages of at most `chunk_size` characters. Each cut
//! lands on the strongest boundary available inside the budget, in this
//! order: paragraph break, line break, sentence end, word boundary, and only
//! then an arbitrary character. The next passage starts up to `overlap`
//! characters before the previous cut so context carries across chunks.
//!
//! Every chunk is a contiguous slice of the input and records its byte
//! offset, so the original text can be rebuilt by dropping the overlap. The
//! one exception is a whitespace run long enough to fill a whole chunk: such
//! spans are not emitted, so the text between two neighbouring chunks may be
//! a gap of pure whitespace.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChunkerError;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;

/// Default overlap between consecutive chunks, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;

/// Boundaries tried in priority order. A raw character cut is the last resort.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// A contiguous span of a session's document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Position of the chunk in the document, starting at 0.
    pub index: usize,

    /// The chunk text, overlap included.
    pub text: String,

    /// Byte offset of `text` in the extracted document text.
    pub start_offset: usize,

    /// Session the document belongs to.
    pub session_id: String,
}

impl DocumentChunk {
    /// Byte offset one past the end of the chunk.
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.text.len()
    }

    /// Length in characters.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Recursive boundary-aware splitter with overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    /// Create a splitter. `overlap` must be smaller than `chunk_size`,
    /// otherwise a chunk could start where the previous one started.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ChunkerError::Configuration(format!(
                "overlap ({overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap between consecutive chunks in characters.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into ordered chunks tagged with `session_id`.
    ///
    /// Empty or whitespace-only input yields no chunks, and whitespace-only
    /// spans inside longer input are skipped.
    pub fn split(&self, session_id: &str, text: &str) -> Vec<DocumentChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chunks: Vec<DocumentChunk> = self
            .spans(text)
            .into_iter()
            .filter(|&(start, end)| !text[start..end].trim().is_empty())
            .enumerate()
            .map(|(index, (start, end))| DocumentChunk {
                index,
                text: text[start..end].to_string(),
                start_offset: start,
                session_id: session_id.to_string(),
            })
            .collect();

        debug!(
            "Split {} characters into {} chunks (size {}, overlap {})",
            text.chars().count(),
            chunks.len(),
            self.chunk_size,
            self.overlap
        );
        chunks
    }

    /// Byte ranges of every chunk.
    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        // Byte offset of each character, plus the end of the text.
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let mut spans = Vec::new();
        let mut start_char = 0;
        loop {
            let start = boundaries[start_char];
            if total_chars - start_char <= self.chunk_size {
                spans.push((start, text.len()));
                return spans;
            }

            let limit = boundaries[start_char + self.chunk_size];
            // A chunk must be longer than the overlap to move forward.
            let min_end = boundaries[start_char + self.overlap + 1];
            let end = find_cut(text, start, limit, min_end).unwrap_or(limit);
            spans.push((start, end));

            let end_char = char_position(&boundaries, end);
            start_char = if self.overlap == 0 {
                end_char
            } else {
                self.overlap_start(text, &boundaries, start_char, end_char)
            };
        }
    }

    /// Character position where the chunk after `[start_char, end_char)`
    /// begins: the earliest strong boundary within the last `overlap`
    /// characters, ignoring trailing whitespace.
    fn overlap_start(
        &self,
        text: &str,
        boundaries: &[usize],
        start_char: usize,
        end_char: usize,
    ) -> usize {
        let window_char = end_char.saturating_sub(self.overlap).max(start_char + 1);
        let window_start = boundaries[window_char];
        let window = &text[window_start..boundaries[end_char]];
        let content = window.trim_end();

        for separator in SEPARATORS {
            if let Some(pos) = content.find(separator) {
                return char_position(boundaries, window_start + pos + separator.len());
            }
        }
        window_char
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// End of the last occurrence of the strongest separator in
/// `text[start..limit]` that ends at or after `min_end`.
fn find_cut(text: &str, start: usize, limit: usize, min_end: usize) -> Option<usize> {
    let window = &text[start..limit];
    SEPARATORS.into_iter().find_map(|separator| {
        window
            .rfind(separator)
            .map(|pos| start + pos + separator.len())
            .filter(|&cut| cut >= min_end)
    })
}

fn char_position(boundaries: &[usize], byte: usize) -> usize {
    boundaries.partition_point(|&b| b < byte)
}
