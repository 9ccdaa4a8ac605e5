//! Core data models for the knowledge engine.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

/// Supported upload formats, detected from the filename extension.
///
/// The set is closed: adding a format means adding a variant and an
/// extraction arm, checked at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
    Epub,
}

impl FileType {
    /// Detect the file type from a filename's extension. Fails with
    /// `UnsupportedFileType` before any parsing is attempted.
    pub fn from_filename(filename: &str) -> Result<Self, KnowledgeError> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            "md" | "markdown" => Ok(Self::Md),
            "epub" => Ok(Self::Epub),
            _ => Err(KnowledgeError::UnsupportedFileType { extension }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Epub => "epub",
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "txt" => Ok(Self::Txt),
            "md" => Ok(Self::Md),
            "epub" => Ok(Self::Epub),
            other => Err(KnowledgeError::UnsupportedFileType {
                extension: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded source, as persisted. Immutable after creation except for
/// metadata enrichment; the owner never changes.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// One retrievable passage, exclusively owned by a single document.
/// `embedding` is `None` when the chunk's embedding call failed during
/// ingestion; such chunks are persisted but excluded from ranking.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

/// A chunk joined with the provenance of its parent document, as returned
/// by the per-user store scan.
#[derive(Debug, Clone)]
pub struct ChunkWithProvenance {
    pub chunk: DocumentChunk,
    pub document_title: String,
}

/// Write payload for a new document. The store assigns nothing: ids and
/// timestamps are chosen by the ingestion pipeline so the whole batch can
/// be committed in one transaction.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
    pub content_hash: String,
    pub created_at: i64,
}

/// Write payload for one chunk of a new document.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

/// A ranked passage returned from retrieval (derived, never persisted).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
    pub relevance: String,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_extensions() {
        assert_eq!(FileType::from_filename("notes.pdf").unwrap(), FileType::Pdf);
        assert_eq!(
            FileType::from_filename("Report.DOCX").unwrap(),
            FileType::Docx
        );
        assert_eq!(FileType::from_filename("a.b.txt").unwrap(), FileType::Txt);
        assert_eq!(
            FileType::from_filename("readme.markdown").unwrap(),
            FileType::Md
        );
        assert_eq!(
            FileType::from_filename("book.epub").unwrap(),
            FileType::Epub
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = FileType::from_filename("slides.pptx").unwrap_err();
        assert_eq!(err.code(), "unsupported_file_type");
    }

    #[test]
    fn rejects_missing_extension() {
        assert!(FileType::from_filename("no_extension").is_err());
    }
}
