//! SQLite-backed document store.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::document::{DocumentStore, StoreError, StoredDocument};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT    NOT NULL,
    id          TEXT    NOT NULL,
    version     INTEGER NOT NULL,
    body        TEXT    NOT NULL,

    created_at  TEXT    NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT    NOT NULL DEFAULT (datetime('now')),

    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#;

/// Document store persisted in a single SQLite table.
///
/// Compare-and-swap is a conditional `UPDATE ... WHERE version = ?`, so
/// concurrent writers from separate processes are also serialized.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url`.
    ///
    /// Accepts either a `sqlite://` URL or a plain file path.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{}", url)
        };

        let opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(url = %url, "Document store opened");
        Ok(Self { pool })
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument, StoreError> {
    let body: String = row.try_get("body")?;
    Ok(StoredDocument {
        id: row.try_get("id")?,
        version: row.try_get::<i64, _>("version")? as u64,
        body: serde_json::from_str(&body)?,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let row = sqlx::query(
            "SELECT id, version, body FROM documents WHERE collection = ?1 AND id = ?2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<StoredDocument, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO documents (collection, id, version, body)
               VALUES (?1, ?2, 1, ?3)
               ON CONFLICT(collection, id) DO NOTHING"#,
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(&body)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        Ok(StoredDocument {
            id: id.to_string(),
            version: 1,
            body,
        })
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> Result<StoredDocument, StoreError> {
        let row = sqlx::query(
            r#"UPDATE documents
               SET body = ?1, version = version + 1, updated_at = datetime('now')
               WHERE collection = ?2 AND id = ?3
               RETURNING version"#,
        )
        .bind(serde_json::to_string(&body)?)
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(collection, id))?;

        Ok(StoredDocument {
            id: id.to_string(),
            version: row.try_get::<i64, _>("version")? as u64,
            body,
        })
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let result = sqlx::query(
            r#"UPDATE documents
               SET body = ?1, version = version + 1, updated_at = datetime('now')
               WHERE collection = ?2 AND id = ?3 AND version = ?4"#,
        )
        .bind(serde_json::to_string(&body)?)
        .bind(collection)
        .bind(id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Some(StoredDocument {
                id: id.to_string(),
                version: expected_version + 1,
                body,
            }));
        }

        if !self.exists(collection, id).await? {
            return Err(StoreError::not_found(collection, id));
        }
        Ok(None)
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, version, body FROM documents WHERE collection = ?1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }
}
