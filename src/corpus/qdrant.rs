//! Qdrant-backed corpus
//!
//! One point per unit. The point id is a UUIDv5 of the unit id, and the
//! payload carries the unit text and metadata. The collection is created on
//! first upsert with the dimension of the embedding model.

use super::{parent_ids, Corpus, ScoredUnit};
use crate::error::{Error, Result};
use crate::pipeline::{DocumentUnit, UnitMetadata};
use crate::provider::EmbedModel;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Payload stored with each point
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PointPayload {
    unit_id: String,
    text: String,
    #[serde(flatten)]
    metadata: UnitMetadata,
}

impl PointPayload {
    fn from_unit(unit: &DocumentUnit) -> Self {
        Self {
            unit_id: unit.id.clone(),
            text: unit.text.clone(),
            metadata: unit.metadata.clone(),
        }
    }

    fn into_unit(self) -> DocumentUnit {
        DocumentUnit {
            id: self.unit_id,
            text: self.text,
            metadata: self.metadata,
        }
    }

    fn to_qdrant_payload(&self) -> Result<HashMap<String, QdrantValue>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant_value(v)))
                .collect()),
            _ => Err(Error::Qdrant("Point payload must be an object".to_string())),
        }
    }
}

/// Stable point id of a unit
pub fn point_id(unit_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, unit_id.as_bytes())
}

pub struct QdrantCorpus {
    client: Qdrant,
    collection: String,
    embed: Arc<dyn EmbedModel>,
    /// Vector size of the collection once it is known to exist
    dimension: Mutex<Option<usize>>,
}

impl QdrantCorpus {
    pub fn new(url: &str, collection: &str, embed: Arc<dyn EmbedModel>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            embed,
            dimension: Mutex::new(None),
        })
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let mut known = self.dimension.lock().await;
        if let Some(existing) = *known {
            if existing != dimension {
                return Err(Error::Qdrant(format!(
                    "Collection '{}' has vector size {}, but the embedding model produced {}",
                    self.collection, existing, dimension
                )));
            }
            return Ok(());
        }

        if !self.client.collection_exists(&self.collection).await? {
            info!(
                "Creating collection {} with dimension {}",
                self.collection, dimension
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                    ),
                )
                .await?;
        }

        *known = Some(dimension);
        Ok(())
    }
}

#[async_trait]
impl Corpus for QdrantCorpus {
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

        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        self.ensure_collection(dimension).await?;

        let stale = Filter::any(
            parent_ids(&units)
                .into_iter()
                .map(|id| Condition::matches("parent_document_id", id)),
        );
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(stale)
                    .wait(true),
            )
            .await?;

        let points = units
            .iter()
            .zip(vectors)
            .map(|(unit, vector)| {
                let payload = PointPayload::from_unit(unit).to_qdrant_payload()?;
                Ok(PointStruct::new(
                    point_id(&unit.id).to_string(),
                    vector,
                    payload,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn query(&self, text: &str, limit: usize) -> Result<Vec<ScoredUnit>> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(Vec::new());
        }

        let vector = self
            .embed
            .embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Empty query embedding".to_string()))?;

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, limit as u64)
                    .with_payload(true),
            )
            .await?;

        let results = response
            .result
            .into_iter()
            .filter_map(|p| {
                let map = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_from_qdrant_value(v)))
                    .collect::<serde_json::Map<String, Value>>();
                serde_json::from_value::<PointPayload>(Value::Object(map))
                    .ok()
                    .map(|payload| ScoredUnit {
                        unit: payload.into_unit(),
                        score: p.score,
                    })
            })
            .collect();
        Ok(results)
    }

    async fn reset(&self) -> Result<()> {
        let mut known = self.dimension.lock().await;
        if self.client.collection_exists(&self.collection).await? {
            info!("Deleting collection {}", self.collection);
            self.client.delete_collection(&self.collection).await?;
        }
        *known = None;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(0);
        }
        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}

/// Convert serde_json Value to a Qdrant value
fn json_to_qdrant_value(v: Value) -> QdrantValue {
    use qdrant_client::qdrant::value::Kind;
    use qdrant_client::qdrant::{ListValue, NullValue, Struct};

    let kind = match v {
        Value::Null => Kind::NullValue(NullValue::NullValue as i32),
        Value::Bool(b) => Kind::BoolValue(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => Kind::StringValue(s),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_qdrant_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, json_to_qdrant_value(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: QdrantValue) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_support::HashEmbed;

    #[test]
    fn test_point_id_is_stable_per_unit() {
        assert_eq!(point_id("file:///r/a.py__part_0"), point_id("file:///r/a.py__part_0"));
        assert_ne!(point_id("file:///r/a.py__part_0"), point_id("file:///r/a.py__part_1"));
    }

    #[test]
    fn test_payload_survives_qdrant_values() {
        let unit = DocumentUnit::chunk("file:///r/a.py", "file:///r/a.py", "python", 1, 2, "x = 1".into());
        let payload = PointPayload::from_unit(&unit).to_qdrant_payload().unwrap();
        assert!(payload.contains_key("parent_document_id"));
        assert!(!payload.contains_key("metadata"));

        let map = payload
            .into_iter()
            .map(|(k, v)| (k, json_from_qdrant_value(v)))
            .collect::<serde_json::Map<String, Value>>();
        let decoded: PointPayload = serde_json::from_value(Value::Object(map)).unwrap();
        assert_eq!(decoded.into_unit(), unit);
    }

    #[tokio::test]
    async fn test_new_does_not_require_server() {
        let corpus = QdrantCorpus::new("http://127.0.0.1:6334", "test_collection", Arc::new(HashEmbed));
        assert!(corpus.is_ok());
    }
}
