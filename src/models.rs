//! Core data models used throughout Recall.
//!
//! These types represent the documents, chunks, tasks, and results that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;

/// A stored document revision. Identity for versioning purposes is the
/// `filename`; at most one row per filename is active at any time.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    /// SHA-256 of the raw uploaded bytes; the dedup key.
    pub content_hash: String,
    pub raw_text: String,
    pub file_size: i64,
    pub uploaded_at: i64,
    pub last_modified: i64,
    pub metadata_json: String,
    /// Monotonic per-filename version, starting at 1.
    pub version: i64,
    pub is_active: bool,
    pub replaced_at: Option<i64>,
}

/// Lifecycle state of an ingestion task, polled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "queued" => Some(TaskState::Queued),
            "processing" => Some(TaskState::Processing),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// Status snapshot for an ingestion task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub filename: String,
    pub state: TaskState,
    pub error: Option<String>,
    pub document_id: Option<String>,
    pub version: Option<i64>,
}

/// Outcome of an upload as reported synchronously to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Byte-identical content already stored; no writes performed.
    Duplicate,
    /// First version of this filename accepted for processing.
    Processing,
    /// A new version was promoted; the previous one was archived.
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub document_id: String,
    pub version: i64,
    /// Absent for duplicates (nothing to process).
    pub task_id: Option<String>,
}

/// A single reranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub chunk_id: i64,
    pub document_id: String,
    pub filename: String,
    pub version: i64,
    pub text: String,
    /// Cosine similarity mapped to [0, 1].
    pub similarity: f64,
    /// Textual recency signal in [0, 1]; higher = reads more current.
    pub recency: f64,
    /// Combined score used for the final ordering.
    pub score: f64,
    pub metadata: serde_json::Value,
}

/// A citation attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub filename: String,
    pub chunk_id: i64,
}

/// A grounded answer with the sources that informed it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// Coverage verdict for one requirement phrase.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementCoverage {
    pub requirement: String,
    pub covered: bool,
    /// Best combined score found for this requirement (0 when no results).
    pub score: f64,
    pub best_source: Option<String>,
}

/// Aggregate completeness report across all requirements.
#[derive(Debug, Clone, Serialize)]
pub struct CompletenessReport {
    pub requirements: Vec<RequirementCoverage>,
    pub covered_count: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Document summary row for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub version: i64,
    pub is_active: bool,
    pub file_size: i64,
    pub uploaded_at: i64,
    pub chunk_count: i64,
}
