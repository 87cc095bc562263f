//! Version resolution and the per-filename upload lock.
//!
//! A document's identity is its filename. Uploading bytes for a filename
//! resolves to one of three outcomes: a brand-new document at version 1, a
//! duplicate (byte-identical content already stored), or a promotion that
//! archives the active version and creates the next one. All row changes for
//! one resolution happen in a single transaction, so readers observe the
//! version flip atomically.
//!
//! Concurrent uploads for the same filename are serialized by
//! [`FilenameLocks`]; uploads for different filenames proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::Document;

/// One async mutex per filename, created on demand.
#[derive(Default)]
pub struct FilenameLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilenameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a filename. The guard is owned so it can be
    /// moved into a background task and held across the whole pipeline.
    pub async fn acquire(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(filename.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Outcome of resolving an upload against the stored versions.
#[derive(Debug)]
pub enum Resolution {
    /// First version of this filename.
    Created { document: Document },
    /// Identical content already active; nothing was written.
    Duplicate { document_id: String, version: i64 },
    /// The previous active version was archived; `document` is the new one.
    Updated {
        document: Document,
        previous_id: String,
    },
}

/// Resolve an upload to a version decision and apply it in one transaction.
///
/// The caller must hold the filename lock. A hash match against the active
/// version of the same filename, or against any active document under a
/// different filename, is reported as a duplicate without writing anything.
/// Promotion deactivates the old document and its chunks before inserting
/// the new row, satisfying the one-active-per-filename unique index.
pub async fn resolve_version(
    pool: &SqlitePool,
    filename: &str,
    content_hash: &str,
    file_size: i64,
    now: i64,
) -> Result<Resolution> {
    let mut tx = pool.begin().await?;

    let active: Option<(String, String, i64)> = sqlx::query_as(
        "SELECT id, content_hash, version FROM documents
         WHERE filename = ? AND is_active = 1",
    )
    .bind(filename)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((previous_id, previous_hash, previous_version)) = active {
        if previous_hash == content_hash {
            tx.rollback().await?;
            return Ok(Resolution::Duplicate {
                document_id: previous_id,
                version: previous_version,
            });
        }

        sqlx::query(
            "UPDATE documents SET is_active = 0, replaced_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(&previous_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE chunks SET is_active = 0, replaced_at = ? WHERE document_id = ?",
        )
        .bind(now)
        .bind(&previous_id)
        .execute(&mut *tx)
        .await?;

        let document = insert_document(
            &mut tx,
            filename,
            content_hash,
            file_size,
            now,
            previous_version + 1,
        )
        .await?;
        tx.commit().await?;
        return Ok(Resolution::Updated {
            document,
            previous_id,
        });
    }

    // New filename: identical content under a different name is still a
    // duplicate of the stored knowledge.
    let same_content: Option<(String, i64)> = sqlx::query_as(
        "SELECT id, version FROM documents
         WHERE content_hash = ? AND is_active = 1
         ORDER BY uploaded_at DESC LIMIT 1",
    )
    .bind(content_hash)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some((document_id, version)) = same_content {
        tx.rollback().await?;
        return Ok(Resolution::Duplicate {
            document_id,
            version,
        });
    }

    let document = insert_document(&mut tx, filename, content_hash, file_size, now, 1).await?;
    tx.commit().await?;
    Ok(Resolution::Created { document })
}

async fn insert_document(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    filename: &str,
    content_hash: &str,
    file_size: i64,
    now: i64,
    version: i64,
) -> Result<Document> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO documents
         (id, filename, content_hash, raw_text, file_size, uploaded_at,
          last_modified, metadata_json, version, is_active)
         VALUES (?, ?, ?, '', ?, ?, ?, '{}', ?, 1)",
    )
    .bind(&id)
    .bind(filename)
    .bind(content_hash)
    .bind(file_size)
    .bind(now)
    .bind(now)
    .bind(version)
    .execute(&mut **tx)
    .await?;

    Ok(Document {
        id,
        filename: filename.to_string(),
        content_hash: content_hash.to_string(),
        raw_text: String::new(),
        file_size,
        uploaded_at: now,
        last_modified: now,
        metadata_json: "{}".to_string(),
        version,
        is_active: true,
        replaced_at: None,
    })
}

/// Undo a failed ingestion of a new version.
///
/// Deletes the failed document row with its chunks and vectors, then
/// reactivates the previous version (if any) together with its chunks.
/// Version numbering stays gapless: the next upload resolves against the
/// reactivated version as if the failed one never existed.
pub async fn rollback_version(
    pool: &SqlitePool,
    failed_document_id: &str,
    previous_id: Option<&str>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(failed_document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(failed_document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(failed_document_id)
        .execute(&mut *tx)
        .await?;

    if let Some(previous) = previous_id {
        sqlx::query(
            "UPDATE documents SET is_active = 1, replaced_at = NULL WHERE id = ?",
        )
        .bind(previous)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE chunks SET is_active = 1, replaced_at = NULL WHERE document_id = ?",
        )
        .bind(previous)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
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
    async fn first_upload_creates_version_one() {
        let pool = test_pool().await;
        let res = resolve_version(&pool, "a.txt", "hash-1", 10, 100)
            .await
            .unwrap();
        match res {
            Resolution::Created { document } => {
                assert_eq!(document.version, 1);
                assert!(document.is_active);
            }
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn identical_hash_is_duplicate() {
        let pool = test_pool().await;
        let first = resolve_version(&pool, "a.txt", "hash-1", 10, 100)
            .await
            .unwrap();
        let Resolution::Created { document } = first else {
            panic!("expected Created");
        };

        let second = resolve_version(&pool, "a.txt", "hash-1", 10, 200)
            .await
            .unwrap();
        match second {
            Resolution::Duplicate {
                document_id,
                version,
            } => {
                assert_eq!(document_id, document.id);
                assert_eq!(version, 1);
            }
            other => panic!("expected Duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_content_under_new_filename_is_duplicate() {
        let pool = test_pool().await;
        resolve_version(&pool, "a.txt", "hash-1", 10, 100)
            .await
            .unwrap();
        let res = resolve_version(&pool, "b.txt", "hash-1", 10, 200)
            .await
            .unwrap();
        assert!(matches!(res, Resolution::Duplicate { .. }));
    }

    #[tokio::test]
    async fn new_hash_promotes_and_archives_previous() {
        let pool = test_pool().await;
        let Resolution::Created { document: v1 } =
            resolve_version(&pool, "a.txt", "hash-1", 10, 100).await.unwrap()
        else {
            panic!("expected Created");
        };

        let res = resolve_version(&pool, "a.txt", "hash-2", 12, 200)
            .await
            .unwrap();
        let Resolution::Updated {
            document: v2,
            previous_id,
        } = res
        else {
            panic!("expected Updated");
        };
        assert_eq!(v2.version, 2);
        assert_eq!(previous_id, v1.id);

        let (active, replaced_at): (bool, Option<i64>) =
            sqlx::query_as("SELECT is_active, replaced_at FROM documents WHERE id = ?")
                .bind(&v1.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(!active);
        assert_eq!(replaced_at, Some(200));
    }

    #[tokio::test]
    async fn rollback_restores_previous_version() {
        let pool = test_pool().await;
        let Resolution::Created { document: v1 } =
            resolve_version(&pool, "a.txt", "hash-1", 10, 100).await.unwrap()
        else {
            panic!("expected Created");
        };
        let Resolution::Updated { document: v2, previous_id } =
            resolve_version(&pool, "a.txt", "hash-2", 12, 200).await.unwrap()
        else {
            panic!("expected Updated");
        };

        rollback_version(&pool, &v2.id, Some(&previous_id))
            .await
            .unwrap();

        let rows: Vec<(String, i64, bool)> =
            sqlx::query_as("SELECT id, version, is_active FROM documents WHERE filename = 'a.txt'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, v1.id);
        assert_eq!(rows[0].1, 1);
        assert!(rows[0].2);

        // Versions stay gapless: the next promotion lands on 2 again.
        let res = resolve_version(&pool, "a.txt", "hash-3", 14, 300)
            .await
            .unwrap();
        let Resolution::Updated { document, .. } = res else {
            panic!("expected Updated");
        };
        assert_eq!(document.version, 2);
    }

    #[tokio::test]
    async fn filename_locks_serialize_same_name() {
        let locks = FilenameLocks::new();
        let g1 = locks.acquire("a.txt").await;
        // A different filename is not blocked.
        let _g2 = locks.acquire("b.txt").await;
        // The same filename is blocked until the guard drops.
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire("a.txt"))
                .await
                .is_err()
        );
        drop(g1);
        let _g3 = locks.acquire("a.txt").await;
    }
}
