use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, CollectionInfo, ScoredVectorPoint, SearchParams, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};

struct StoredPoint {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    vector_size: u64,
    indexed_fields: Vec<String>,
    points: Vec<(String, StoredPoint)>,
}

/// Exact-search store kept in process memory.
///
/// Points keep insertion order, so equal scores come back in the order they were upserted.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Payload fields that have a keyword index, for assertions in tests.
    #[must_use]
    pub fn indexed_fields(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .ok()
            .and_then(|cols| cols.get(collection).map(|c| c.indexed_fields.clone()))
            .unwrap_or_default()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn matches_filter(payload: &HashMap<String, serde_json::Value>, filter: &VectorFilter) -> bool {
    filter
        .must
        .iter()
        .all(|cond| payload.get(&cond.field).and_then(|v| v.as_str()) == Some(cond.value.as_str()))
}

fn lock_err(e: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::Collection(format!("store lock poisoned: {e}"))
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.collections.write().map_err(lock_err)?;
            cols.entry(collection)
                .or_insert_with(|| InMemoryCollection {
                    vector_size,
                    indexed_fields: Vec::new(),
                    points: Vec::new(),
                });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.collections.read().map_err(lock_err)?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self.collections.write().map_err(lock_err)?;
            cols.remove(&collection);
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
            let mut cols = self.collections.write().map_err(lock_err)?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            if !col.indexed_fields.contains(&field) {
                col.indexed_fields.push(field);
            }
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
            let mut cols = self.collections.write().map_err(lock_err)?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            for p in points {
                if p.vector.len() as u64 != col.vector_size {
                    return Err(VectorStoreError::Upsert(format!(
                        "vector size {} does not match collection {collection} size {}",
                        p.vector.len(),
                        col.vector_size
                    )));
                }
                let stored = StoredPoint {
                    vector: p.vector,
                    payload: p.payload,
                };
                match col.points.iter_mut().find(|(id, _)| *id == p.id) {
                    Some((_, existing)) => *existing = stored,
                    None => col.points.push((p.id, stored)),
                }
            }
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
            let cols = self.collections.read().map_err(lock_err)?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;

            let empty_filter = VectorFilter::default();
            let f = filter.as_ref().unwrap_or(&empty_filter);

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, f))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    payload: sp.payload.clone(),
                })
                .filter(|p| params.score_threshold.is_none_or(|t| p.score >= t))
                .collect();

            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(usize::try_from(params.limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self.collections.read().map_err(lock_err)?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            Ok(CollectionInfo {
                points_count: col.points.len() as u64,
                vector_size: col.vector_size,
                distance: "Cosine".to_owned(),
            })
        })
    }
}
