//! Code retrieval-augmented generation pipeline.
//!
//! Source files are split into structure-aware chunks, embedded with
//! metadata-enhanced text, and stored in a vector collection. At query time
//! the question is embedded, candidates are over-fetched and re-ranked toward
//! complete documented modules, and the survivors are rendered into a prompt
//! for the generative backend.

pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod metadata;
pub mod prompt;
pub mod retriever;
pub mod store;

pub use chunker::{Chunk, ChunkKind, ChunkMetadata, ChunkerConfig};
pub use embedder::Embedder;
pub use engine::{NO_RELEVANT_CODE, RagEngine, RagService};
pub use error::{IndexError, Result};
pub use indexer::{IndexOptions, IndexReport, RepoSource, index_repositories};
pub use metadata::IndexMetadata;
pub use prompt::{PromptBuilder, PromptConfig};
pub use retriever::{CodeRetriever, RetrievalConfig};
pub use store::{CodeStore, SearchResult, StoreStats};
