//! Local corpus: vectors in memory, snapshotted to a JSON file

use super::{cosine_similarity, parent_ids, Corpus, ScoredUnit};
use crate::error::{Error, Result};
use crate::pipeline::DocumentUnit;
use crate::provider::EmbedModel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUnit {
    unit: DocumentUnit,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    units: Vec<StoredUnit>,
}

/// Corpus held in process memory
///
/// Queries take a read lock; writes take the write lock and rewrite the
/// snapshot file before releasing it.
pub struct LocalCorpus {
    embed: Arc<dyn EmbedModel>,
    path: Option<PathBuf>,
    units: RwLock<Vec<StoredUnit>>,
}

impl LocalCorpus {
    /// Load the snapshot at `path` if present
    pub async fn open(path: &Path, embed: Arc<dyn EmbedModel>) -> Result<Self> {
        let units = if path.exists() {
            let content = tokio::fs::read(path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&content)?;
            info!(
                "Loaded {} units from corpus snapshot {:?}",
                snapshot.units.len(),
                path
            );
            snapshot.units
        } else {
            Vec::new()
        };

        Ok(Self {
            embed,
            path: Some(path.to_path_buf()),
            units: RwLock::new(units),
        })
    }

    /// Corpus that is never written to disk
    pub fn in_memory(embed: Arc<dyn EmbedModel>) -> Self {
        Self {
            embed,
            path: None,
            units: RwLock::new(Vec::new()),
        }
    }

    async fn persist(&self, units: &[StoredUnit]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            units: &'a [StoredUnit],
        }

        let content = serde_json::to_vec(&SnapshotRef { units })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Wrote corpus snapshot with {} units", units.len());
        Ok(())
    }
}

#[async_trait]
impl Corpus for LocalCorpus {
    async fn upsert(&self, units: Vec<DocumentUnit>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }

        let texts = units.iter().map(|u| u.text.clone()).collect::<Vec<_>>();
        let vectors = self.embed.embed(texts).await?;
        if vectors.len() != units.len() {
            return Err(Error::Provider(format!(
                "Expected {} embeddings, got {}",
                units.len(),
                vectors.len()
            )));
        }

        let parents = parent_ids(&units);
        let mut stored = self.units.write().await;
        stored.retain(|s| !parents.contains(s.unit.parent_document_id()));
        stored.extend(
            units
                .into_iter()
                .zip(vectors)
                .map(|(unit, vector)| StoredUnit { unit, vector }),
        );

        self.persist(&stored).await
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<ScoredUnit>> {
        let query_vector = self
            .embed
            .embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Empty query embedding".to_string()))?;

        let stored = self.units.read().await;
        let mut scored: Vec<ScoredUnit> = stored
            .iter()
            .map(|s| ScoredUnit {
                unit: s.unit.clone(),
                score: cosine_similarity(&query_vector, &s.vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn reset(&self) -> Result<()> {
        let mut stored = self.units.write().await;
        stored.clear();
        info!("Local corpus reset");
        self.persist(&stored).await
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.units.read().await.len())
    }
}
