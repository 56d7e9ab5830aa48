//! Resource registry: the persisted catalog of watched origins

use super::now_timestamp;
use crate::error::{Error, Result};
use crate::uri;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

/// Resource origin kind, discriminated by URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Path,
    Https,
}

impl ResourceKind {
    /// Classify a URI, `None` for unsupported schemes
    pub fn from_uri(value: &str) -> Option<Self> {
        if uri::is_local(value) {
            Some(ResourceKind::Path)
        } else if uri::is_remote(value) {
            Some(ResourceKind::Https)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Path => write!(f, "path"),
            ResourceKind::Https => write!(f, "https"),
        }
    }
}

/// Activity status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Inactive,
    Error,
}

impl std::fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityStatus::Active => write!(f, "active"),
            ActivityStatus::Inactive => write!(f, "inactive"),
            ActivityStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ActivityStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ActivityStatus::Active),
            "inactive" => Ok(ActivityStatus::Inactive),
            "error" => Ok(ActivityStatus::Error),
            _ => Err(Error::Config(format!("Unknown activity status: {}", s))),
        }
    }
}

/// Aggregate indexing status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
}

impl IndexingStatus {
    /// Terminal statuses stamp `last_indexed_at`
    pub fn is_terminal(self) -> bool {
        matches!(self, IndexingStatus::Indexed | IndexingStatus::Failed)
    }
}

impl std::fmt::Display for IndexingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexingStatus::Pending => write!(f, "pending"),
            IndexingStatus::Indexing => write!(f, "indexing"),
            IndexingStatus::Indexed => write!(f, "indexed"),
            IndexingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for IndexingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(IndexingStatus::Pending),
            "indexing" => Ok(IndexingStatus::Indexing),
            "indexed" => Ok(IndexingStatus::Indexed),
            "failed" => Ok(IndexingStatus::Failed),
            _ => Err(Error::Config(format!("Unknown indexing status: {}", s))),
        }
    }
}

/// A registered origin under management
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub indexing_status: String,
    pub indexing_status_message: Option<String>,
    pub indexing_started_at: Option<String>,
    pub created_at: String,
    pub last_indexed_at: Option<String>,
    pub last_error: Option<String>,
}

impl Resource {
    /// Build a new active, pending resource; fails on unsupported URI schemes
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Result<Self> {
        let uri = uri.into();
        let kind = ResourceKind::from_uri(&uri)
            .ok_or_else(|| Error::InvalidRequest(format!("Invalid URI: {}", uri)))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            uri,
            kind: kind.to_string(),
            status: ActivityStatus::Active.to_string(),
            indexing_status: IndexingStatus::Pending.to_string(),
            indexing_status_message: None,
            indexing_started_at: None,
            created_at: now_timestamp(),
            last_indexed_at: None,
            last_error: None,
        })
    }

    pub fn activity(&self) -> Result<ActivityStatus> {
        self.status.parse()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.activity(), Ok(ActivityStatus::Active))
    }

    pub fn get_indexing_status(&self) -> Result<IndexingStatus> {
        self.indexing_status.parse()
    }
}

/// Resource registry backed by the `resources` table
///
/// Every operation is a single immediately-committed statement.
#[derive(Clone)]
pub struct ResourceRegistry {
    pool: SqlitePool,
}

impl ResourceRegistry {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new resource; `DuplicateResource` if the name or URI is taken
    pub async fn add(&self, resource: &Resource) -> Result<()> {
        if self.get_by_name(&resource.name).await?.is_some() {
            return Err(Error::DuplicateResource(format!(
                "Resource with same name already exists: {}",
                resource.name
            )));
        }
        if self.get(&resource.uri).await?.is_some() {
            return Err(Error::DuplicateResource(format!(
                "Resource with same uri already exists: {}",
                resource.uri
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO resources (id, name, uri, type, status, indexing_status,
                indexing_status_message, indexing_started_at, created_at, last_indexed_at, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(&resource.uri)
        .bind(&resource.kind)
        .bind(&resource.status)
        .bind(&resource.indexing_status)
        .bind(&resource.indexing_status_message)
        .bind(&resource.indexing_started_at)
        .bind(&resource.created_at)
        .bind(&resource.last_indexed_at)
        .bind(&resource.last_error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!("Registered resource {} ({})", resource.name, resource.uri);
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::DuplicateResource(format!("{} ({})", resource.name, resource.uri)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Get resource by URI
    pub async fn get(&self, uri: &str) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;
        Ok(resource)
    }

    /// Get resource by name (case-sensitive match)
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Resource>> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(resource)
    }

    /// List all resources
    pub async fn list_all(&self) -> Result<Vec<Resource>> {
        let resources =
            sqlx::query_as::<_, Resource>("SELECT * FROM resources ORDER BY created_at, name")
                .fetch_all(&self.pool)
                .await?;
        Ok(resources)
    }

    /// List resources whose activity status is `active`
    pub async fn list_active(&self) -> Result<Vec<Resource>> {
        let resources = sqlx::query_as::<_, Resource>(
            "SELECT * FROM resources WHERE status = ? ORDER BY created_at, name",
        )
        .bind(ActivityStatus::Active.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(resources)
    }

    /// Set the activity status and last error of a resource
    pub async fn set_activity(
        &self,
        uri: &str,
        status: ActivityStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE resources SET status = ?, last_error = ? WHERE uri = ?")
            .bind(status.to_string())
            .bind(error)
            .bind(uri)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Resource not found: {}", uri)));
        }
        Ok(())
    }

    /// Set the aggregate indexing status
    ///
    /// `indexing` stamps the start time; terminal statuses clear it and stamp
    /// `last_indexed_at`.
    pub async fn set_indexing_status(
        &self,
        uri: &str,
        status: IndexingStatus,
        message: &str,
    ) -> Result<()> {
        let now = now_timestamp();
        let query = match status {
            IndexingStatus::Indexing => sqlx::query(
                r#"
                UPDATE resources
                SET indexing_status = ?, indexing_status_message = ?, indexing_started_at = ?
                WHERE uri = ?
                "#,
            )
            .bind(status.to_string())
            .bind(message)
            .bind(&now)
            .bind(uri),
            s if s.is_terminal() => sqlx::query(
                r#"
                UPDATE resources
                SET indexing_status = ?, indexing_status_message = ?,
                    indexing_started_at = NULL, last_indexed_at = ?
                WHERE uri = ?
                "#,
            )
            .bind(status.to_string())
            .bind(message)
            .bind(&now)
            .bind(uri),
            _ => sqlx::query(
                r#"
                UPDATE resources
                SET indexing_status = ?, indexing_status_message = ?, indexing_started_at = NULL
                WHERE uri = ?
                "#,
            )
            .bind(status.to_string())
            .bind(message)
            .bind(uri),
        };

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Resource not found: {}", uri)));
        }
        Ok(())
    }
}
