//! Plain-text extraction from uploaded document bytes.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Document formats the chat service reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Portable Document Format.
    Pdf,
    /// UTF-8 text or Markdown.
    Text,
}

impl DocumentKind {
    /// Detect the kind from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        Self::from_extension(&extension)
    }

    /// Detect the kind from a bare extension such as `pdf`.
    pub fn from_extension(extension: &str) -> Result<Self, ExtractError> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" | "md" => Ok(Self::Text),
            other => Err(ExtractError::UnsupportedType(other.to_string())),
        }
    }

    /// Extension used when the raw document is stored.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
        }
    }
}

/// Extract the text of a document.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    match kind {
        DocumentKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        DocumentKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}
