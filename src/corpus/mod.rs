//! The shared searchable corpus
//!
//! A [`Corpus`] embeds and stores document units and answers ranked
//! queries. Upserting a unit replaces every stored unit with the same
//! `parent_document_id`, so re-indexing a document drops its stale chunks.

mod memory;
mod qdrant;

pub use memory::LocalCorpus;
pub use qdrant::QdrantCorpus;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::DocumentUnit;
use crate::provider::EmbedModel;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// A unit returned by a corpus query with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredUnit {
    pub unit: DocumentUnit,
    pub score: f32,
}

/// Vector index and query engine
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Store units, replacing previous units of the same parent documents
    async fn upsert(&self, units: Vec<DocumentUnit>) -> Result<()>;

    /// Rank stored units against `text`, best first
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<ScoredUnit>>;

    /// Drop every stored unit
    async fn reset(&self) -> Result<()>;

    /// Number of stored units
    async fn len(&self) -> Result<usize>;
}

/// Open the configured corpus backend
pub async fn open_corpus(config: &Config, embed: Arc<dyn EmbedModel>) -> Result<Arc<dyn Corpus>> {
    match config.corpus.backend.as_str() {
        "local" => {
            info!("Using local corpus at {:?}", config.paths.corpus_file);
            let corpus = LocalCorpus::open(&config.paths.corpus_file, embed).await?;
            Ok(Arc::new(corpus))
        }
        "qdrant" => {
            info!(
                "Using Qdrant corpus {} at {}",
                config.corpus.collection, config.corpus.qdrant_url
            );
            let corpus =
                QdrantCorpus::new(&config.corpus.qdrant_url, &config.corpus.collection, embed)?;
            Ok(Arc::new(corpus))
        }
        other => Err(Error::Config(format!("Unknown corpus backend: {}", other))),
    }
}

/// Parent document ids touched by a set of units
pub(crate) fn parent_ids(units: &[DocumentUnit]) -> HashSet<String> {
    units
        .iter()
        .map(|u| u.parent_document_id().to_string())
        .collect()
}

/// Cosine similarity; zero for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::Error;
    use crate::provider::EmbedModel;

    const DIMENSION: usize = 64;

    /// Deterministic hashed bag-of-words embedder
    pub struct HashEmbed;

    impl HashEmbed {
        pub fn vector(text: &str) -> Vec<f32> {
            let mut vector = vec![0.0f32; DIMENSION];
            for token in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                let hash = blake3::hash(token.to_lowercase().as_bytes());
                let bytes = hash.as_bytes();
                let idx = u64::from_le_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]) as usize
                    % DIMENSION;
                vector[idx] += 1.0;
            }
            vector
        }
    }

    #[async_trait]
    impl EmbedModel for HashEmbed {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }

        fn model_name(&self) -> &str {
            "hash-bow"
        }
    }

    /// Corpus whose writes always fail
    pub struct FailingCorpus;

    #[async_trait]
    impl Corpus for FailingCorpus {
        async fn upsert(&self, _units: Vec<DocumentUnit>) -> Result<()> {
            Err(Error::Other("corpus unavailable".to_string()))
        }

        async fn query(&self, _text: &str, _limit: usize) -> Result<Vec<ScoredUnit>> {
            Err(Error::Other("corpus unavailable".to_string()))
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }

        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    /// In-memory corpus over the hashed embedder
    pub fn local_corpus() -> Arc<LocalCorpus> {
        Arc::new(LocalCorpus::in_memory(Arc::new(HashEmbed)))
    }
}
