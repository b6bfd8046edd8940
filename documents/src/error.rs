//! Error types for document processing.

use thiserror::Error;

/// Invalid chunking parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    /// The chunk size or overlap cannot make progress through a document.
    #[error("invalid chunking configuration: {0}")]
    Configuration(String),
}

/// Failure to turn uploaded bytes into text.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The file type is not one we can read.
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    /// The PDF could not be parsed.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}
