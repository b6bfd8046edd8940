//! # Documents
//!
//! Turns an uploaded document into ordered, overlapping passages ready for
//! embedding.
//!
//! ```text
//! bytes ──► extract_text ──► TextSplitter ──► Vec<DocumentChunk>
//! ```

pub mod chunker;
pub mod error;
pub mod extract;

pub use chunker::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DocumentChunk, TextSplitter};
pub use error::{ChunkerError, ExtractError};
pub use extract::{DocumentKind, extract_text};
