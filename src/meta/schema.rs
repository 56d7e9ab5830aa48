//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Resources: registered local directories and remote origins
CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    uri TEXT NOT NULL UNIQUE,
    type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    indexing_status TEXT NOT NULL DEFAULT 'pending',
    indexing_status_message TEXT,
    indexing_started_at TEXT,
    created_at TEXT NOT NULL,
    last_indexed_at TEXT,
    last_error TEXT
);

-- Indexing history: one row per document unit, updated in place
CREATE TABLE IF NOT EXISTS indexing_history (
    id TEXT PRIMARY KEY,
    uri TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    error_message TEXT,
    document_id TEXT NOT NULL UNIQUE,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_history_uri ON indexing_history(uri);
CREATE INDEX IF NOT EXISTS idx_history_document_id ON indexing_history(document_id);
CREATE INDEX IF NOT EXISTS idx_history_content_hash ON indexing_history(content_hash);
CREATE INDEX IF NOT EXISTS idx_history_status ON indexing_history(status);
CREATE INDEX IF NOT EXISTS idx_resources_status ON resources(status);
"#;
