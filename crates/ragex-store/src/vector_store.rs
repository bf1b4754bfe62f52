use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    /// The store could not be reached at all.
    #[error("connection error: {0}")]
    Connection(String),
    /// The store is reachable but the collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Conjunction of keyword equality conditions.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCondition {
    pub field: String,
    pub value: String,
}

impl FieldCondition {
    #[must_use]
    pub fn keyword(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Per-query search knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub limit: u64,
    /// Results scoring below this are dropped by the store.
    pub score_threshold: Option<f32>,
    /// HNSW beam width; larger is slower and more accurate.
    pub hnsw_ef: Option<u64>,
    /// Bypass the ANN index and scan every point.
    pub exact: bool,
}

impl SearchParams {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            score_threshold: None,
            hnsw_ef: None,
            exact: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub vector_size: u64,
    pub distance: String,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Create a cosine collection unless one with the same name exists.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    /// Delete a collection. Deleting a missing collection is not an error.
    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Create a keyword payload index on `field` to speed up filtered search.
    fn create_keyword_index(
        &self,
        collection: &str,
        field: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Similarity search, best match first, at most `params.limit` results.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        params: SearchParams,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<CollectionInfo, VectorStoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_params_defaults() {
        let params = SearchParams::new(15);
        assert_eq!(params.limit, 15);
        assert!(params.score_threshold.is_none());
        assert!(params.hnsw_ef.is_none());
        assert!(!params.exact);
    }

    #[test]
    fn error_display_distinguishes_connection_and_missing() {
        let conn = VectorStoreError::Connection("refused".into());
        let missing = VectorStoreError::CollectionNotFound("code".into());
        assert_eq!(conn.to_string(), "connection error: refused");
        assert_eq!(missing.to_string(), "collection not found: code");
    }

    #[test]
    fn keyword_condition() {
        let cond = FieldCondition::keyword("repo", "phoenix");
        assert_eq!(cond.field, "repo");
        assert_eq!(cond.value, "phoenix");
        assert!(VectorFilter::default().is_empty());
    }
}
