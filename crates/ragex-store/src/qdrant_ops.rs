//! Qdrant backend for [`VectorStore`].

use std::collections::HashMap;

use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, PointStruct, ScoredPoint, SearchParamsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder, point_id::PointIdOptions, value::Kind,
    vectors_config,
};
use qdrant_client::{Qdrant, QdrantError};

use crate::vector_store::{
    BoxFuture, CollectionInfo, ScoredVectorPoint, SearchParams, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};

/// Thin wrapper over [`Qdrant`] client encapsulating collection operations.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` for the given gRPC URL.
    ///
    /// The client connects lazily; an unreachable server surfaces on first use.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the URL cannot be parsed.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Probe the server.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if Qdrant cannot be reached.
    pub async fn health_check(&self) -> Result<(), VectorStoreError> {
        self.client
            .health_check()
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Convert a JSON object to a Qdrant payload map.
    ///
    /// # Errors
    ///
    /// Returns a JSON error if `value` is not an object.
    pub fn json_to_payload(
        value: serde_json::Value,
    ) -> Result<HashMap<String, qdrant_client::qdrant::Value>, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Sort a client error into "unreachable", "missing collection", or the caller's category.
///
/// The gRPC status is only exposed through the error text, so this matches on it.
fn classify(err: &QdrantError, fallback: fn(String) -> VectorStoreError) -> VectorStoreError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("not found") || lower.contains("doesn't exist") {
        VectorStoreError::CollectionNotFound(msg)
    } else if lower.contains("transport error")
        || lower.contains("connection refused")
        || lower.contains("unavailable")
        || lower.contains("deadline")
    {
        VectorStoreError::Connection(msg)
    } else {
        fallback(msg)
    }
}

impl VectorStore for QdrantOps {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| classify(&e, VectorStoreError::Collection))?
            {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| classify(&e, VectorStoreError::Collection))?;
            tracing::info!(%collection, vector_size, "created Qdrant collection");
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self.collection_exists(&collection).await? {
                return Ok(());
            }
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| classify(&e, VectorStoreError::Collection))?;
            tracing::info!(%collection, "deleted Qdrant collection");
            Ok(())
        })
    }

    fn create_keyword_index(
        &self,
        collection: &str,
        field: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let field = field.to_owned();
        Box::pin(async move {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &collection,
                    &field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| classify(&e, VectorStoreError::Collection))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let qdrant_points = points
                .into_iter()
                .map(|p| {
                    let payload = Self::json_to_payload(serde_json::Value::Object(
                        p.payload.into_iter().collect(),
                    ))
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                    Ok(PointStruct::new(p.id, p.vector, payload))
                })
                .collect::<Result<Vec<_>, VectorStoreError>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| classify(&e, VectorStoreError::Upsert))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        params: SearchParams,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut search_params = SearchParamsBuilder::default().exact(params.exact);
            if let Some(ef) = params.hnsw_ef {
                search_params = search_params.hnsw_ef(ef);
            }
            let mut builder = SearchPointsBuilder::new(&collection, vector, params.limit)
                .with_payload(true)
                .params(search_params);
            if let Some(threshold) = params.score_threshold {
                builder = builder.score_threshold(threshold);
            }
            if let Some(f) = filter.filter(|f| !f.is_empty()) {
                builder = builder.filter(vector_filter_to_qdrant(f));
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| classify(&e, VectorStoreError::Search))?;
            Ok(response
                .result
                .into_iter()
                .map(scored_point_to_vector)
                .collect())
        })
    }

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self.collection_exists(&collection).await? {
                return Err(VectorStoreError::CollectionNotFound(collection));
            }
            let response = self
                .client
                .collection_info(&collection)
                .await
                .map_err(|e| classify(&e, VectorStoreError::Collection))?;
            let info = response.result.ok_or_else(|| {
                VectorStoreError::Collection(format!("empty info response for {collection}"))
            })?;

            let vector_params = info
                .config
                .and_then(|c| c.params)
                .and_then(|p| p.vectors_config)
                .and_then(|v| v.config);
            let (vector_size, distance) = match vector_params {
                Some(vectors_config::Config::Params(params)) => (
                    params.size,
                    Distance::try_from(params.distance)
                        .map_or_else(|_| "Unknown".to_owned(), |d| d.as_str_name().to_owned()),
                ),
                _ => (0, "Unknown".to_owned()),
            };

            Ok(CollectionInfo {
                points_count: info.points_count.unwrap_or(0),
                vector_size,
                distance,
            })
        })
    }
}

fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    Filter::must(
        filter
            .must
            .into_iter()
            .map(|cond| Condition::matches(cond.field, cond.value))
            .collect::<Vec<_>>(),
    )
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> serde_json::Value {
    match value.kind {
        None | Some(Kind::NullValue(_)) => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => serde_json::Value::Array(
            list.values.into_iter().map(qdrant_value_to_json).collect(),
        ),
        Some(Kind::StructValue(st)) => serde_json::Value::Object(
            st.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    let payload: HashMap<String, serde_json::Value> = point
        .payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect();

    let id = match point.id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    };

    ScoredVectorPoint {
        id,
        score: point.score,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_valid_url() {
        assert!(QdrantOps::new("http://localhost:6334").is_ok());
    }

    #[test]
    fn debug_format() {
        let ops = QdrantOps::new("http://localhost:6334").unwrap();
        assert!(format!("{ops:?}").contains("QdrantOps"));
    }

    #[test]
    fn json_to_payload_rejects_non_object() {
        assert!(QdrantOps::json_to_payload(serde_json::json!([1, 2])).is_err());
        assert!(QdrantOps::json_to_payload(serde_json::json!({})).unwrap().is_empty());
    }

    #[test]
    fn nested_payload_survives_conversion() {
        let original = serde_json::json!({
            "text": "defmodule A do\nend",
            "functions": ["login", "logout"],
            "metadata": {"has_docs": true, "function_count": 2},
            "line_start": 1,
        });
        let payload = QdrantOps::json_to_payload(original.clone()).unwrap();
        let back: serde_json::Map<String, serde_json::Value> = payload
            .into_iter()
            .map(|(k, v)| (k, qdrant_value_to_json(v)))
            .collect();
        assert_eq!(serde_json::Value::Object(back), original);
    }

    #[test]
    fn filter_conversion_keeps_all_conditions() {
        let filter = VectorFilter {
            must: vec![
                crate::FieldCondition::keyword("repo", "phoenix"),
                crate::FieldCondition::keyword("module", "Phoenix.Router"),
            ],
        };
        let qf = vector_filter_to_qdrant(filter);
        assert_eq!(qf.must.len(), 2);
    }

    #[test]
    fn scored_point_uuid_id() {
        let point = ScoredPoint {
            id: Some(qdrant_client::qdrant::PointId {
                point_id_options: Some(PointIdOptions::Uuid("abc".into())),
            }),
            score: 0.5,
            ..Default::default()
        };
        let converted = scored_point_to_vector(point);
        assert_eq!(converted.id, "abc");
        assert!((converted.score - 0.5).abs() < f32::EPSILON);
    }
}
