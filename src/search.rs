//! Semantic search over active chunks.
//!
//! A query is embedded with the same provider as the corpus, matched against
//! the ANN index, hydrated from SQLite, and reranked. Archived versions
//! never appear in results: the index carries per-chunk activity flags kept
//! in step with version promotion, and hydration re-checks the database
//! flags to cover the moment between a database flip and the index catching
//! up.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_one, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::models::SearchResultItem;
use crate::rerank::{rerank, Candidate};

struct ChunkRow {
    document_id: String,
    filename: String,
    version: i64,
    text: String,
    metadata_json: String,
    recency_score: f64,
    last_modified: i64,
}

/// Run a search and return up to `top_k` reranked results.
///
/// A blank query returns no results rather than an error. Candidates are
/// over-fetched by `candidate_multiplier` so reranking has room to reorder
/// before the cut.
pub async fn search_chunks(
    pool: &SqlitePool,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    retrieval: &RetrievalConfig,
    query: &str,
    top_k: usize,
) -> Result<Vec<SearchResultItem>> {
    let query = query.trim();
    if query.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embed_one(embedder, query).await?;

    let fetch = top_k.saturating_mul(retrieval.candidate_multiplier.max(1));
    let hits = index.search(&query_vec, fetch);
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let mut rows: HashMap<i64, ChunkRow> = HashMap::with_capacity(hits.len());
    for (chunk_id, _) in &hits {
        let row: Option<(String, String, i64, String, String, f64, i64)> = sqlx::query_as(
            "SELECT c.document_id, d.filename, c.version, c.text,
                    c.metadata_json, c.recency_score, d.last_modified
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.id = ? AND c.is_active = 1 AND d.is_active = 1",
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;

        if let Some((document_id, filename, version, text, metadata_json, recency_score, last_modified)) =
            row
        {
            rows.insert(
                *chunk_id,
                ChunkRow {
                    document_id,
                    filename,
                    version,
                    text,
                    metadata_json,
                    recency_score,
                    last_modified,
                },
            );
        }
    }

    let candidates: Vec<Candidate> = hits
        .iter()
        .filter_map(|(chunk_id, distance)| {
            rows.get(chunk_id).map(|row| Candidate {
                chunk_id: *chunk_id,
                distance: *distance,
                text_recency: row.recency_score,
                last_modified: row.last_modified,
            })
        })
        .collect();

    let ranked = rerank(
        &candidates,
        retrieval.similarity_weight,
        retrieval.recency_weight,
    );

    let results = ranked
        .into_iter()
        .take(top_k)
        .filter_map(|r| {
            let row = rows.remove(&r.chunk_id)?;
            let metadata =
                serde_json::from_str(&row.metadata_json).unwrap_or(serde_json::Value::Null);
            Some(SearchResultItem {
                chunk_id: r.chunk_id,
                document_id: row.document_id,
                filename: row.filename,
                version: row.version,
                text: row.text,
                similarity: r.similarity,
                recency: r.recency,
                score: r.score,
                metadata,
            })
        })
        .collect();

    Ok(results)
}
