//! The engine facade.
//!
//! [`Engine`] owns the pool, the vector index, and the providers, and
//! exposes every operation the CLI (or an embedding application) needs.
//! Opening an engine runs migrations and rebuilds the ANN index from the
//! vector log, so a process restart recovers the full search state.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::answer::answer_question;
use crate::completeness::check_completeness;
use crate::completion::{create_completion_provider, CompletionProvider};
use crate::config::Config;
use crate::db::connect;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::ingest::{self, PreparedIngest};
use crate::migrate::run_migrations;
use crate::models::{
    Answer, CompletenessReport, Document, DocumentSummary, IngestOutcome, SearchResultItem,
    TaskStatus,
};
use crate::search::search_chunks;
use crate::task;
use crate::version::FilenameLocks;

#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    pool: SqlitePool,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionProvider>,
    locks: Arc<FilenameLocks>,
}

impl Engine {
    /// Open the engine with providers built from the config.
    pub async fn open(config: Config) -> Result<Engine> {
        let embedder = create_provider(&config.embedding)?;
        let completion = create_completion_provider(&config.completion)?;
        Self::open_with_providers(config, embedder, completion).await
    }

    /// Open with caller-supplied providers. The seam tests use to inject
    /// failing or scripted providers.
    pub async fn open_with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Result<Engine> {
        let pool = connect(&config.db.path).await?;
        run_migrations(&pool).await?;
        let index = VectorIndex::load(&pool, &config.index, embedder.dims()).await?;

        Ok(Engine {
            config: Arc::new(config),
            pool,
            index: Arc::new(index),
            embedder,
            completion,
            locks: Arc::new(FilenameLocks::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ingest an upload and wait for processing to finish.
    ///
    /// Duplicate uploads return immediately. A processing failure surfaces
    /// as an error after the task has been marked failed and the version
    /// decision rolled back.
    pub async fn ingest(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestOutcome> {
        let PreparedIngest { outcome, work } =
            ingest::prepare(&self.pool, &self.locks, filename, bytes).await?;
        if let Some(work) = work {
            ingest::process(
                &self.pool,
                &self.index,
                self.embedder.as_ref(),
                &self.config,
                work,
            )
            .await?;
        }
        Ok(outcome)
    }

    /// Ingest an upload in the background.
    ///
    /// Returns as soon as the version decision is made; processing continues
    /// on a spawned task that holds the filename lock until it finishes.
    /// Poll [`Engine::task_status`] with the returned task id.
    pub async fn submit(&self, filename: &str, bytes: Vec<u8>) -> Result<IngestOutcome> {
        let PreparedIngest { outcome, work } =
            ingest::prepare(&self.pool, &self.locks, filename, bytes).await?;
        if let Some(work) = work {
            let pool = self.pool.clone();
            let index = self.index.clone();
            let embedder = self.embedder.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                // Failures are already recorded on the task row.
                let _ = ingest::process(&pool, &index, embedder.as_ref(), &config, work).await;
            });
        }
        Ok(outcome)
    }

    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SearchResultItem>> {
        search_chunks(
            &self.pool,
            &self.index,
            self.embedder.as_ref(),
            &self.config.retrieval,
            query,
            top_k.unwrap_or(self.config.retrieval.top_k),
        )
        .await
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        answer_question(
            &self.pool,
            &self.index,
            self.embedder.as_ref(),
            self.completion.as_ref(),
            &self.config.retrieval,
            question,
        )
        .await
    }

    pub async fn check_completeness(&self, requirements: &[String]) -> Result<CompletenessReport> {
        check_completeness(
            &self.pool,
            &self.index,
            self.embedder.as_ref(),
            &self.config.retrieval,
            requirements,
        )
        .await
    }

    pub async fn task_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        task::task_status(&self.pool, task_id).await
    }

    /// Fetch one document by id, any version.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row: Option<(
            String,
            String,
            String,
            String,
            i64,
            i64,
            i64,
            String,
            i64,
            bool,
            Option<i64>,
        )> = sqlx::query_as(
            "SELECT id, filename, content_hash, raw_text, file_size, uploaded_at,
                    last_modified, metadata_json, version, is_active, replaced_at
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                id,
                filename,
                content_hash,
                raw_text,
                file_size,
                uploaded_at,
                last_modified,
                metadata_json,
                version,
                is_active,
                replaced_at,
            )| Document {
                id,
                filename,
                content_hash,
                raw_text,
                file_size,
                uploaded_at,
                last_modified,
                metadata_json,
                version,
                is_active,
                replaced_at,
            },
        ))
    }

    /// List every stored version, newest filename groups first by upload time.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows: Vec<(String, String, i64, bool, i64, i64, i64)> = sqlx::query_as(
            "SELECT d.id, d.filename, d.version, d.is_active, d.file_size, d.uploaded_at,
                    COUNT(c.id)
             FROM documents d
             LEFT JOIN chunks c ON c.document_id = d.id
             GROUP BY d.id
             ORDER BY d.filename ASC, d.version DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, filename, version, is_active, file_size, uploaded_at, chunk_count)| {
                    DocumentSummary {
                        id,
                        filename,
                        version,
                        is_active,
                        file_size,
                        uploaded_at,
                        chunk_count,
                    }
                },
            )
            .collect())
    }

    /// Number of vectors currently in the ANN index (all versions).
    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}
