//! Code chunk collection: payload indexes, batched upload, filtered search.

use std::collections::HashMap;
use std::sync::Arc;

use ragex_store::{
    FieldCondition, ScoredVectorPoint, SearchParams, VectorFilter, VectorPoint, VectorStore,
};
use tokio::sync::Mutex;

use crate::chunker::Chunk;
use crate::error::{IndexError, Result};

/// Payload fields that get a keyword index for filtered search.
pub const INDEXED_FIELDS: [&str; 3] = ["repo", "module", "type"];

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub score: f32,
    pub id: String,
    pub chunk: Chunk,
}

/// Live collection statistics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub total_points: u64,
    pub vector_dim: u64,
    pub distance: String,
}

/// Options for [`CodeStore::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions<'a> {
    pub repo: Option<&'a str>,
    pub module: Option<&'a str>,
    pub score_threshold: Option<f32>,
    pub hnsw_ef: Option<u64>,
}

/// The code chunk collection on top of a generic vector store.
///
/// Collection resets and uploads are serialized; searches run unlocked.
pub struct CodeStore {
    store: Arc<dyn VectorStore>,
    collection: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl CodeStore {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Prepare a cosine collection of `dimension` and its payload indexes.
    ///
    /// With `reset` any existing collection of the same name is dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects any step.
    pub async fn create_collection(&self, dimension: usize, reset: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if reset {
            self.store.delete_collection(&self.collection).await?;
            tracing::info!(collection = %self.collection, "collection reset");
        }
        self.store
            .ensure_collection(&self.collection, u64::try_from(dimension)?)
            .await?;
        for field in INDEXED_FIELDS {
            self.store
                .create_keyword_index(&self.collection, field)
                .await?;
        }
        tracing::info!(collection = %self.collection, dimension, "collection ready");
        Ok(())
    }

    /// Store chunks paired by position with their embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::LengthMismatch`] before uploading anything when
    /// the inputs differ in length, or the first failing upsert.
    pub async fn index_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: Vec<Vec<f32>>,
        batch_size: usize,
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        let points = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                Ok(VectorPoint {
                    id: uuid::Uuid::new_v4().to_string(),
                    vector,
                    payload: chunk_payload(chunk)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.write_lock.lock().await;
        let mut stored = 0;
        let mut remaining = points;
        let batch_size = batch_size.max(1);
        while !remaining.is_empty() {
            let rest = remaining.split_off(batch_size.min(remaining.len()));
            let batch = std::mem::replace(&mut remaining, rest);
            let len = batch.len();
            self.store.upsert(&self.collection, batch).await?;
            stored += len;
            tracing::debug!(collection = %self.collection, stored, "uploaded batch");
        }
        Ok(stored)
    }

    /// Nearest chunks to `vector`, best first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns a store error, or a JSON error for a payload that is not a chunk.
    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        options: SearchOptions<'_>,
    ) -> Result<Vec<SearchResult>> {
        let mut params = SearchParams::new(u64::try_from(limit)?);
        params.score_threshold = options.score_threshold;
        params.hnsw_ef = options.hnsw_ef;

        let mut filter = VectorFilter::default();
        if let Some(repo) = options.repo {
            filter.must.push(FieldCondition::keyword("repo", repo));
        }
        if let Some(module) = options.module {
            filter.must.push(FieldCondition::keyword("module", module));
        }
        let filter = (!filter.is_empty()).then_some(filter);

        let points = self
            .store
            .search(&self.collection, vector, params, filter)
            .await?;
        points.into_iter().map(search_result).collect()
    }

    /// # Errors
    ///
    /// Returns [`ragex_store::VectorStoreError::CollectionNotFound`] (wrapped)
    /// when nothing has been indexed yet.
    pub async fn stats(&self) -> Result<StoreStats> {
        let info = self.store.collection_info(&self.collection).await?;
        Ok(StoreStats {
            total_points: info.points_count,
            vector_dim: info.vector_size,
            distance: info.distance,
        })
    }
}

fn chunk_payload(chunk: &Chunk) -> Result<HashMap<String, serde_json::Value>> {
    match serde_json::to_value(chunk)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(IndexError::Other(format!(
            "chunk serialized to non-object: {other}"
        ))),
    }
}

fn search_result(point: ScoredVectorPoint) -> Result<SearchResult> {
    let payload: serde_json::Map<String, serde_json::Value> = point.payload.into_iter().collect();
    let chunk: Chunk = serde_json::from_value(serde_json::Value::Object(payload))?;
    Ok(SearchResult {
        score: point.score,
        id: point.id,
        chunk,
    })
}

#[cfg(test)]
mod tests {
    use ragex_store::{InMemoryVectorStore, VectorStoreError};

    use super::*;
    use crate::chunker::{ChunkKind, ChunkMetadata};

    fn chunk(text: &str, repo: &str, module: Option<&str>, kind: ChunkKind) -> Chunk {
        Chunk {
            text: text.into(),
            file: format!("lib/{text}.ex"),
            repo: repo.into(),
            kind,
            module: module.map(str::to_owned),
            functions: (kind == ChunkKind::ModuleSection).then(|| vec!["run".to_owned()]),
            metadata: ChunkMetadata {
                has_docs: kind == ChunkKind::Module,
                function_count: 1,
            },
            line_start: (kind == ChunkKind::TextChunk).then_some(1),
            line_end: (kind == ChunkKind::TextChunk).then_some(10),
        }
    }

    fn code_store() -> (Arc<InMemoryVectorStore>, CodeStore) {
        let inner = Arc::new(InMemoryVectorStore::new());
        let store = CodeStore::new(inner.clone(), "code");
        (inner, store)
    }

    #[tokio::test]
    async fn create_collection_indexes_payload_fields() {
        let (inner, store) = code_store();
        store.create_collection(3, true).await.unwrap();
        let mut fields = inner.indexed_fields("code");
        fields.sort();
        assert_eq!(fields, vec!["module", "repo", "type"]);
    }

    #[tokio::test]
    async fn reset_drops_existing_points() {
        let (_, store) = code_store();
        store.create_collection(2, true).await.unwrap();
        let c = chunk("a", "r", Some("A"), ChunkKind::Module);
        store
            .index_chunks(std::slice::from_ref(&c), vec![vec![1.0, 0.0]], 10)
            .await
            .unwrap();
        assert_eq!(store.stats().await.unwrap().total_points, 1);

        store.create_collection(2, false).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_points, 1);

        store.create_collection(2, true).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_points, 0);
    }

    #[tokio::test]
    async fn length_mismatch_uploads_nothing() {
        let (_, store) = code_store();
        store.create_collection(2, true).await.unwrap();
        let chunks = vec![
            chunk("a", "r", Some("A"), ChunkKind::Module),
            chunk("b", "r", Some("B"), ChunkKind::Module),
        ];
        let err = store
            .index_chunks(&chunks, vec![vec![1.0, 0.0]], 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::LengthMismatch {
                chunks: 2,
                embeddings: 1
            }
        ));
        assert_eq!(store.stats().await.unwrap().total_points, 0);
    }

    #[tokio::test]
    async fn payload_round_trips_through_store() {
        let (_, store) = code_store();
        store.create_collection(2, true).await.unwrap();
        let chunks = vec![
            chunk("section", "r", Some("Big"), ChunkKind::ModuleSection),
            chunk("window", "r", None, ChunkKind::TextChunk),
        ];
        let stored = store
            .index_chunks(&chunks, vec![vec![1.0, 0.0], vec![0.0, 1.0]], 1)
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let results = store
            .search(vec![1.0, 0.0], 10, SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk, chunks[0]);
        assert_eq!(results[1].chunk, chunks[1]);
        assert!(results[0].score >= results[1].score);
        assert_ne!(results[0].id, results[1].id);
    }

    #[tokio::test]
    async fn search_applies_filters_threshold_and_limit() {
        let (_, store) = code_store();
        store.create_collection(2, true).await.unwrap();
        let chunks = vec![
            chunk("a", "api", Some("A"), ChunkKind::Module),
            chunk("b", "web", Some("B"), ChunkKind::Module),
            chunk("c", "api", Some("C"), ChunkKind::Module),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![1.0, 0.1], vec![0.0, 1.0]];
        store.index_chunks(&chunks, embeddings, 100).await.unwrap();

        let by_repo = store
            .search(
                vec![1.0, 0.0],
                10,
                SearchOptions {
                    repo: Some("api"),
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(by_repo.iter().all(|r| r.chunk.repo == "api"));
        assert_eq!(by_repo.len(), 2);

        let thresholded = store
            .search(
                vec![1.0, 0.0],
                10,
                SearchOptions {
                    score_threshold: Some(0.5),
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(thresholded.len(), 2);

        let by_module = store
            .search(
                vec![1.0, 0.0],
                1,
                SearchOptions {
                    module: Some("C"),
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_module.len(), 1);
        assert_eq!(by_module[0].chunk.module.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn stats_on_missing_collection_is_not_found() {
        let (_, store) = code_store();
        let err = store.stats().await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Store(VectorStoreError::CollectionNotFound(_))
        ));
        assert!(!err.is_unavailable());
    }
}
