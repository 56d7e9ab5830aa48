//! Indexing history: per-document audit log and dedup source

use super::now_timestamp;
use crate::error::{Error, Result};
use crate::pipeline::UnitMetadata;
use serde::{Deserialize, Serialize};
use crate::uri::PART_MARKER;
use sqlx::sqlite::{Sqlite, SqlitePool};
use sqlx::{FromRow, QueryBuilder};
use std::str::FromStr;
use uuid::Uuid;

/// Status of one document unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Indexing,
    Completed,
    Failed,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Indexing => write!(f, "indexing"),
            HistoryStatus::Completed => write!(f, "completed"),
            HistoryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "indexing" => Ok(HistoryStatus::Indexing),
            "completed" => Ok(HistoryStatus::Completed),
            "failed" => Ok(HistoryStatus::Failed),
            _ => Err(Error::Config(format!("Unknown history status: {}", s))),
        }
    }
}

/// One row of the indexing history
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub uri: String,
    pub content_hash: String,
    pub status: String,
    pub timestamp: String,
    pub error_message: Option<String>,
    pub document_id: String,
    pub metadata: Option<String>,
}

impl HistoryRecord {
    pub fn get_status(&self) -> Result<HistoryStatus> {
        self.status.parse()
    }

    /// Decoded unit metadata, if any was recorded
    pub fn unit_metadata(&self) -> Option<UnitMetadata> {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_str(m).ok())
    }
}

/// Identity of a document unit as written to the history
#[derive(Debug, Clone, Copy)]
pub struct DocumentKey<'a> {
    pub document_id: &'a str,
    pub uri: &'a str,
    pub content_hash: &'a str,
}

/// History store backed by the `indexing_history` table
///
/// Rows are keyed by document id; every write is a single upsert, so
/// concurrent writers for the same id resolve last-writer-wins.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Mark a unit as entering the corpus
    pub async fn mark_indexing(
        &self,
        key: DocumentKey<'_>,
        metadata: Option<&UnitMetadata>,
    ) -> Result<()> {
        self.upsert(key, HistoryStatus::Indexing, None, metadata)
            .await
    }

    /// Mark a unit as stored in the corpus
    pub async fn mark_completed(
        &self,
        key: DocumentKey<'_>,
        metadata: Option<&UnitMetadata>,
    ) -> Result<()> {
        self.upsert(key, HistoryStatus::Completed, None, metadata)
            .await
    }

    /// Mark a unit as failed with a reason
    pub async fn mark_failed(&self, key: DocumentKey<'_>, error: &str) -> Result<()> {
        self.upsert(key, HistoryStatus::Failed, Some(error), None)
            .await
    }

    async fn upsert(
        &self,
        key: DocumentKey<'_>,
        status: HistoryStatus,
        error: Option<&str>,
        metadata: Option<&UnitMetadata>,
    ) -> Result<()> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO indexing_history
                (id, uri, content_hash, status, timestamp, error_message, document_id, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                uri = excluded.uri,
                content_hash = excluded.content_hash,
                status = excluded.status,
                timestamp = excluded.timestamp,
                error_message = excluded.error_message,
                metadata = COALESCE(excluded.metadata, indexing_history.metadata)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key.uri)
        .bind(key.content_hash)
        .bind(status.to_string())
        .bind(now_timestamp())
        .bind(error)
        .bind(key.document_id)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True iff a completed record exists for this exact (uri, content hash)
    pub async fn is_processed(&self, uri: &str, content_hash: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM indexing_history
            WHERE uri = ? AND content_hash = ? AND status = 'completed'
            LIMIT 1
            "#,
        )
        .bind(uri)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Drop the records of a document's units that are not in `keep`
    ///
    /// A document's units are the parent id itself and its `__part_N`
    /// chunks under the same uri. Called before a reprocessed document's
    /// new units are written, so records of chunks the new content no
    /// longer produces cannot satisfy [`Self::is_processed`].
    pub async fn prune_units(&self, uri: &str, parent_id: &str, keep: &[&str]) -> Result<u64> {
        let prefix = format!("{}{}", parent_id, PART_MARKER);

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM indexing_history WHERE uri = ");
        query.push_bind(uri.to_string());
        query.push(" AND (document_id = ");
        query.push_bind(parent_id.to_string());
        query.push(" OR substr(document_id, 1, ");
        query.push_bind(prefix.chars().count() as i64);
        query.push(") = ");
        query.push_bind(prefix);
        query.push(")");

        if !keep.is_empty() {
            query.push(" AND document_id NOT IN (");
            let mut ids = query.separated(", ");
            for id in keep {
                ids.push_bind(id.to_string());
            }
            ids.push_unseparated(")");
        }

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Get the record of a document unit
    pub async fn get(&self, document_id: &str) -> Result<Option<HistoryRecord>> {
        let record = sqlx::query_as::<_, HistoryRecord>(
            "SELECT * FROM indexing_history WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Records for every unit whose uri is the base uri or lies beneath it
    pub async fn list_for_base_uri(&self, base_uri: &str) -> Result<Vec<HistoryRecord>> {
        let base = base_uri.trim_end_matches('/');
        let prefix = format!("{}/", base);

        let records = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT * FROM indexing_history
            WHERE uri = ? OR substr(uri, 1, ?) = ?
            ORDER BY uri, document_id
            "#,
        )
        .bind(base)
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Delete all history (used when the corpus is rebuilt)
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM indexing_history")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
