//! Metadata storage using SQLite
//!
//! This module handles all persisted state:
//! - Resources (the registry of watched origins)
//! - Indexing history (per-document status, the source of dedup truth)

mod history;
mod resources;
mod schema;

pub use history::*;
pub use resources::*;
pub use schema::*;

use crate::config::Config;
use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

/// Current time as an RFC 3339 string with microsecond precision
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        let db_path = &config.paths.db_file;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Connect and make sure the schema exists
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Self::connect(config).await?;
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Resource registry view over this database
    pub fn resources(&self) -> ResourceRegistry {
        ResourceRegistry::new(self.pool.clone())
    }

    /// Indexing history view over this database
    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(self.pool.clone())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = MetaDb::open(&config).await.unwrap();
        (db, tmp)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_test_db;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let (db, _tmp) = setup_test_db().await;
        db.init_schema().await.unwrap();
        assert!(db.resources().list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = super::now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = super::now_timestamp();
        assert!(a < b);
    }
}
