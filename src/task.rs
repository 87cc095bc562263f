//! Ingestion task records.
//!
//! Every non-duplicate upload gets a task row that tracks the pipeline
//! through queued, processing, and a terminal completed or failed state.
//! Callers poll by task id.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{TaskState, TaskStatus};

pub async fn create_task(pool: &SqlitePool, filename: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO tasks (id, filename, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(filename)
    .bind(TaskState::Queued.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn mark_processing(pool: &SqlitePool, task_id: &str) -> Result<()> {
    set_state(pool, task_id, TaskState::Processing, None, None, None).await
}

pub async fn mark_completed(
    pool: &SqlitePool,
    task_id: &str,
    document_id: &str,
    version: i64,
) -> Result<()> {
    set_state(
        pool,
        task_id,
        TaskState::Completed,
        None,
        Some(document_id),
        Some(version),
    )
    .await
}

pub async fn mark_failed(pool: &SqlitePool, task_id: &str, reason: &str) -> Result<()> {
    set_state(pool, task_id, TaskState::Failed, Some(reason), None, None).await
}

async fn set_state(
    pool: &SqlitePool,
    task_id: &str,
    state: TaskState,
    error: Option<&str>,
    document_id: Option<&str>,
    version: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks
         SET status = ?, error = ?, document_id = COALESCE(?, document_id),
             version = COALESCE(?, version), updated_at = ?
         WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(error)
    .bind(document_id)
    .bind(version)
    .bind(Utc::now().timestamp())
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Look up a task by id. `None` when no such task exists.
pub async fn task_status(pool: &SqlitePool, task_id: &str) -> Result<Option<TaskStatus>> {
    let row: Option<(String, String, String, Option<String>, Option<String>, Option<i64>)> =
        sqlx::query_as(
            "SELECT id, filename, status, error, document_id, version
             FROM tasks WHERE id = ?",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    let Some((id, filename, status, error, document_id, version)) = row else {
        return Ok(None);
    };
    let state = TaskState::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("unknown task status in storage: {}", status))?;

    Ok(Some(TaskStatus {
        id,
        filename,
        state,
        error,
        document_id,
        version,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn lifecycle_queued_to_completed() {
        let pool = test_pool().await;
        let id = create_task(&pool, "a.txt").await.unwrap();

        let status = task_status(&pool, &id).await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Queued);
        assert_eq!(status.filename, "a.txt");

        mark_processing(&pool, &id).await.unwrap();
        assert_eq!(
            task_status(&pool, &id).await.unwrap().unwrap().state,
            TaskState::Processing
        );

        mark_completed(&pool, &id, "doc-1", 3).await.unwrap();
        let status = task_status(&pool, &id).await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert_eq!(status.document_id.as_deref(), Some("doc-1"));
        assert_eq!(status.version, Some(3));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn failure_records_reason() {
        let pool = test_pool().await;
        let id = create_task(&pool, "bad.pdf").await.unwrap();
        mark_failed(&pool, &id, "extraction failed").await.unwrap();
        let status = task_status(&pool, &id).await.unwrap().unwrap();
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(status.error.as_deref(), Some("extraction failed"));
    }

    #[tokio::test]
    async fn unknown_task_is_none() {
        let pool = test_pool().await;
        assert!(task_status(&pool, "nope").await.unwrap().is_none());
    }
}
