//! Error taxonomy for the knowledge engine.
//!
//! Ingestion-side errors (`UnsupportedFileType`, `FileTooLarge`,
//! `ExtractionFailed`, `EmptyContent`) are terminal for that upload and are
//! surfaced verbatim to the caller. Embedding errors are recovered per chunk
//! during ingestion and converted to a structured failure response at the
//! search boundary — the conversational tool layer never sees a raw fault.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("unsupported file type: .{extension} (supported: pdf, docx, txt, md, epub)")]
    UnsupportedFileType { extension: String },

    #[error("file too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("text extraction failed: {reason} — the document may be corrupted or password-protected")]
    ExtractionFailed { reason: String },

    #[error("document contains no extractable text")]
    EmptyContent,

    #[error("embedding call timed out after {seconds}s")]
    EmbeddingTimeout { seconds: u64 },

    #[error("embedding provider error: {reason}")]
    EmbeddingProvider { reason: String },

    #[error("no authenticated user — sign in before uploading or searching documents")]
    Unauthenticated,

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl KnowledgeError {
    pub fn extraction<S: Into<String>>(reason: S) -> Self {
        Self::ExtractionFailed {
            reason: reason.into(),
        }
    }

    pub fn provider<S: Into<String>>(reason: S) -> Self {
        Self::EmbeddingProvider {
            reason: reason.into(),
        }
    }

    /// Machine-readable code used in the tool layer's error contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFileType { .. } => "unsupported_file_type",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::EmptyContent => "empty_content",
            Self::EmbeddingTimeout { .. } => "embedding_timeout",
            Self::EmbeddingProvider { .. } => "embedding_provider_error",
            Self::Unauthenticated => "unauthenticated",
            Self::Storage(_) => "storage_failure",
        }
    }
}
