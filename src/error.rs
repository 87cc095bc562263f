//! Error taxonomy for the ingestion and retrieval engine.
//!
//! `Validation` errors are rejected synchronously and never reach the task
//! queue. `Extraction`, `EmbeddingUnavailable`, and `CompletionUnavailable`
//! occur mid-task and are recorded as a task failure with a human-readable
//! reason; no partial document state is committed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or empty input, unsupported file type. Rejected before queueing.
    #[error("validation error: {0}")]
    Validation(String),

    /// Text is blank after extraction; nothing to chunk.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Text extraction from the uploaded bytes failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The embedding backend is unreachable or rejected the request.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The completion backend is unreachable or rejected the request.
    #[error("completion backend unavailable: {0}")]
    CompletionUnavailable(String),
}
