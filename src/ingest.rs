//! The ingestion pipeline.
//!
//! An upload is split into two phases. `prepare` runs synchronously under
//! the filename lock: it validates the upload, hashes the bytes, and
//! resolves the version decision, returning the outcome the caller sees
//! immediately. For non-duplicates it also returns the pending work, with
//! the lock guard embedded so the filename stays locked until processing
//! ends. `process` then extracts, chunks, embeds, and persists, either
//! inline (blocking ingest) or on a spawned task (background submit).
//!
//! Chunk and vector writes happen in a single transaction after every
//! embedding has been computed, so a failed upload never leaves partial
//! chunks behind. On failure the version decision itself is compensated by
//! [`rollback_version`], restoring the previously active version.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingProvider};
use crate::error::EngineError;
use crate::extract::{extract_text, is_supported};
use crate::index::VectorIndex;
use crate::models::{Document, IngestOutcome, IngestStatus};
use crate::task;
use crate::version::{resolve_version, rollback_version, FilenameLocks, Resolution};

/// Result of the synchronous phase: the outcome to report, plus pending
/// work when the upload was not a duplicate.
pub struct PreparedIngest {
    pub outcome: IngestOutcome,
    pub work: Option<IngestWork>,
}

/// Everything the processing phase needs, including the filename lock guard.
pub struct IngestWork {
    guard: OwnedMutexGuard<()>,
    pub task_id: String,
    pub document: Document,
    pub previous_id: Option<String>,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// SHA-256 of the raw bytes as lowercase hex; the dedup key.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn validate(filename: &str, bytes: &[u8]) -> Result<(), EngineError> {
    if filename.trim().is_empty() {
        return Err(EngineError::Validation("filename is empty".to_string()));
    }
    if bytes.is_empty() {
        return Err(EngineError::EmptyInput(format!(
            "uploaded file {} is empty",
            filename
        )));
    }
    if !is_supported(filename) {
        return Err(EngineError::Validation(format!(
            "unsupported file type: {}",
            filename
        )));
    }
    Ok(())
}

/// Validate the upload and resolve its version under the filename lock.
pub async fn prepare(
    pool: &SqlitePool,
    locks: &FilenameLocks,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<PreparedIngest> {
    validate(filename, &bytes)?;

    let guard = locks.acquire(filename).await;
    let hash = content_hash(&bytes);
    let now = Utc::now().timestamp();

    match resolve_version(pool, filename, &hash, bytes.len() as i64, now).await? {
        Resolution::Duplicate {
            document_id,
            version,
        } => {
            tracing::info!(filename, version, "duplicate content, nothing to do");
            Ok(PreparedIngest {
                outcome: IngestOutcome {
                    status: IngestStatus::Duplicate,
                    document_id,
                    version,
                    task_id: None,
                },
                work: None,
            })
        }
        Resolution::Created { document } => {
            let task_id = task::create_task(pool, filename).await?;
            Ok(PreparedIngest {
                outcome: IngestOutcome {
                    status: IngestStatus::Processing,
                    document_id: document.id.clone(),
                    version: document.version,
                    task_id: Some(task_id.clone()),
                },
                work: Some(IngestWork {
                    guard,
                    task_id,
                    document,
                    previous_id: None,
                    filename: filename.to_string(),
                    bytes,
                }),
            })
        }
        Resolution::Updated {
            document,
            previous_id,
        } => {
            tracing::info!(
                filename,
                version = document.version,
                "content changed, promoting new version"
            );
            let task_id = task::create_task(pool, filename).await?;
            Ok(PreparedIngest {
                outcome: IngestOutcome {
                    status: IngestStatus::Updated,
                    document_id: document.id.clone(),
                    version: document.version,
                    task_id: Some(task_id.clone()),
                },
                work: Some(IngestWork {
                    guard,
                    task_id,
                    document,
                    previous_id: Some(previous_id),
                    filename: filename.to_string(),
                    bytes,
                }),
            })
        }
    }
}

/// Run extraction through persistence for prepared work.
///
/// Marks the task completed or failed; on failure the version decision is
/// rolled back so the previous version is active again. The filename lock
/// is released when this returns.
pub async fn process(
    pool: &SqlitePool,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    work: IngestWork,
) -> Result<()> {
    let IngestWork {
        guard: _guard,
        task_id,
        document,
        previous_id,
        filename,
        bytes,
    } = work;

    task::mark_processing(pool, &task_id).await?;

    // Mirror the version resolver's soft-delete in the index, so archived
    // chunks stop surfacing without a per-query corpus scan.
    let archived_chunk_ids: Vec<i64> = match previous_id.as_deref() {
        Some(previous) => {
            let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
                .bind(previous)
                .fetch_all(pool)
                .await?;
            index.set_active_many(&ids, false);
            ids
        }
        None => Vec::new(),
    };

    match run_pipeline(pool, index, embedder, config, &document, &filename, &bytes).await {
        Ok(chunk_count) => {
            task::mark_completed(pool, &task_id, &document.id, document.version).await?;
            tracing::info!(
                filename,
                version = document.version,
                chunks = chunk_count,
                "ingestion completed"
            );
            Ok(())
        }
        Err(e) => {
            tracing::warn!(filename, error = %e, "ingestion failed, rolling back version");
            task::mark_failed(pool, &task_id, &e.to_string()).await?;
            rollback_version(pool, &document.id, previous_id.as_deref()).await?;
            index.set_active_many(&archived_chunk_ids, true);
            Err(e)
        }
    }
}

async fn run_pipeline(
    pool: &SqlitePool,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    config: &Config,
    document: &Document,
    filename: &str,
    bytes: &[u8],
) -> Result<usize> {
    let text = extract_text(bytes, filename)?;
    let pieces = chunk_document(
        &text,
        config.chunking.chunk_chars,
        config.chunking.overlap_chars,
    )?;

    // Embed everything before writing anything, so persistence is
    // all-or-nothing.
    let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.embedding.batch_size.max(1)) {
        vectors.extend(embedder.embed_batch(batch).await?);
    }
    if vectors.len() != pieces.len() {
        return Err(EngineError::EmbeddingUnavailable(format!(
            "expected {} vectors, got {}",
            pieces.len(),
            vectors.len()
        ))
        .into());
    }

    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut inserted: Vec<(i64, Vec<f32>)> = Vec::with_capacity(pieces.len());

    for (piece, vector) in pieces.iter().zip(vectors.into_iter()) {
        let chunk_id: i64 = sqlx::query_scalar(
            "INSERT INTO chunks
             (document_id, chunk_index, text, metadata_json, recency_score,
              version, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)
             RETURNING id",
        )
        .bind(&document.id)
        .bind(piece.index)
        .bind(&piece.text)
        .bind(&piece.metadata_json)
        .bind(piece.recency_score)
        .bind(document.version)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, document_id, embedding, model, dims)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chunk_id)
        .bind(&document.id)
        .bind(vec_to_blob(&vector))
        .bind(embedder.model_name())
        .bind(embedder.dims() as i64)
        .execute(&mut *tx)
        .await?;

        inserted.push((chunk_id, vector));
    }

    sqlx::query("UPDATE documents SET raw_text = ? WHERE id = ?")
        .bind(&text)
        .bind(&document.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    // Only committed vectors enter the index.
    for (chunk_id, vector) in inserted.iter() {
        index.insert(*chunk_id, vector.clone());
    }

    Ok(inserted.len())
}
