//! Collection-oriented vector storage: a dyn-compatible [`VectorStore`] trait with
//! a Qdrant backend for production and an in-memory backend for tests and
//! offline runs.

pub mod in_memory_store;
pub mod qdrant_ops;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use vector_store::{
    CollectionInfo, FieldCondition, ScoredVectorPoint, SearchParams, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};
