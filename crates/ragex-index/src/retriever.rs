//! Semantic retrieval with over-fetch and metadata-aware re-ranking.

use std::sync::Arc;

use ragex_llm::LlmProvider;
use serde::{Deserialize, Serialize};

use crate::chunker::ChunkKind;
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::store::{CodeStore, SearchOptions, SearchResult};

const MODULE_BOOST: f32 = 0.1;
const DOCS_BOOST: f32 = 0.05;
const PER_FUNCTION_BOOST: f32 = 0.01;
const MAX_FUNCTION_BOOST: f32 = 0.05;

fn default_k() -> usize {
    5
}

fn default_score_threshold() -> f32 {
    0.3
}

fn default_overfetch_factor() -> usize {
    3
}

fn default_hnsw_ef() -> u64 {
    128
}

fn default_rerank() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Candidates fetched per requested result when re-ranking.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_hnsw_ef")]
    pub hnsw_ef: u64,
    #[serde(default = "default_rerank")]
    pub rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: default_score_threshold(),
            overfetch_factor: default_overfetch_factor(),
            hnsw_ef: default_hnsw_ef(),
            rerank: default_rerank(),
        }
    }
}

impl RetrievalConfig {
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.k == 0 {
            return Err("retrieval.k must be greater than 0".into());
        }
        if !(-1.0..=1.0).contains(&self.score_threshold) {
            return Err(format!(
                "retrieval.score_threshold must be within [-1, 1], got {}",
                self.score_threshold
            ));
        }
        if self.overfetch_factor == 0 {
            return Err("retrieval.overfetch_factor must be greater than 0".into());
        }
        Ok(())
    }
}

/// Embeds questions, searches the code collection, and re-ranks candidates.
pub struct CodeRetriever<E> {
    embedder: Arc<Embedder<E>>,
    store: Arc<CodeStore>,
    config: RetrievalConfig,
}

impl<E> std::fmt::Debug for CodeRetriever<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRetriever")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: LlmProvider> CodeRetriever<E> {
    #[must_use]
    pub fn new(embedder: Arc<Embedder<E>>, store: Arc<CodeStore>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CodeStore> {
        &self.store
    }

    /// The `k` most relevant chunks for `query`, possibly fewer.
    ///
    /// When re-ranking, `k * overfetch_factor` candidates are fetched and
    /// ordered by [`adjusted_score`] before truncation.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmptyQuery`] for a blank query, or an embedding or
    /// store error.
    pub async fn retrieve_context(
        &self,
        query: &str,
        k: usize,
        repo_filter: Option<&str>,
        rerank: bool,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(IndexError::EmptyQuery);
        }
        let vector = self.embedder.encode(query).await?;

        let limit = if rerank {
            k.saturating_mul(self.config.overfetch_factor)
        } else {
            k
        };
        let mut results = self
            .store
            .search(
                vector,
                limit,
                SearchOptions {
                    repo: repo_filter,
                    module: None,
                    score_threshold: Some(self.config.score_threshold),
                    hnsw_ef: Some(self.config.hnsw_ef),
                },
            )
            .await?;

        tracing::debug!(candidates = results.len(), k, rerank, "retrieved candidates");
        if rerank && results.len() > k {
            rerank_results(&mut results);
        }
        results.truncate(k);
        Ok(results)
    }
}

/// Similarity plus boosts for complete modules, documentation, and function count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn adjusted_score(result: &SearchResult) -> f32 {
    let chunk = &result.chunk;
    let mut score = result.score;
    if chunk.kind == ChunkKind::Module {
        score += MODULE_BOOST;
    }
    if chunk.metadata.has_docs {
        score += DOCS_BOOST;
    }
    score + (chunk.metadata.function_count as f32 * PER_FUNCTION_BOOST).min(MAX_FUNCTION_BOOST)
}

/// Stable sort by [`adjusted_score`], highest first.
pub fn rerank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| adjusted_score(b).total_cmp(&adjusted_score(a)));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ragex_llm::mock::MockProvider;
    use ragex_store::InMemoryVectorStore;

    use super::*;
    use crate::chunker::{Chunk, ChunkMetadata};

    fn result(score: f32, kind: ChunkKind, has_docs: bool, function_count: usize) -> SearchResult {
        SearchResult {
            score,
            id: format!("{score}-{kind}"),
            chunk: Chunk {
                text: "code".into(),
                file: "lib/x.ex".into(),
                repo: "r".into(),
                kind,
                module: (kind != ChunkKind::TextChunk).then(|| "X".to_owned()),
                functions: None,
                metadata: ChunkMetadata {
                    has_docs,
                    function_count,
                },
                line_start: None,
                line_end: None,
            },
        }
    }

    #[test]
    fn adjusted_score_boosts() {
        let r = result(0.5, ChunkKind::Module, true, 2);
        assert!((adjusted_score(&r) - 0.67).abs() < 1e-6);
        let capped = result(0.5, ChunkKind::ModuleSection, false, 40);
        assert!((adjusted_score(&capped) - 0.55).abs() < 1e-6);
        let plain = result(0.5, ChunkKind::TextChunk, false, 0);
        assert!((adjusted_score(&plain) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn module_outranks_section_at_equal_score() {
        let mut results = vec![
            result(0.8, ChunkKind::ModuleSection, false, 0),
            result(0.8, ChunkKind::Module, false, 0),
        ];
        rerank_results(&mut results);
        assert_eq!(results[0].chunk.kind, ChunkKind::Module);
    }

    #[test]
    fn documented_outranks_undocumented_at_equal_score() {
        let mut results = vec![
            result(0.7, ChunkKind::ModuleSection, false, 1),
            result(0.7, ChunkKind::ModuleSection, true, 1),
        ];
        rerank_results(&mut results);
        assert!(results[0].chunk.metadata.has_docs);
    }

    #[test]
    fn rerank_is_stable_for_ties() {
        let mut results = vec![
            result(0.6, ChunkKind::TextChunk, false, 0),
            result(0.6, ChunkKind::TextChunk, false, 0),
        ];
        results[0].id = "first".into();
        results[1].id = "second".into();
        rerank_results(&mut results);
        assert_eq!(results[0].id, "first");
    }

    #[test]
    fn config_defaults_and_validation() {
        let config = RetrievalConfig::default();
        assert_eq!(config.k, 5);
        assert_eq!(config.overfetch_factor, 3);
        assert_eq!(config.hnsw_ef, 128);
        assert!(config.validate().is_ok());
        let bad = RetrievalConfig {
            k: 0,
            ..RetrievalConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    async fn seeded_retriever(
        provider: MockProvider,
        seeds: Vec<(SearchResult, Vec<f32>)>,
    ) -> CodeRetriever<MockProvider> {
        let store = Arc::new(CodeStore::new(Arc::new(InMemoryVectorStore::new()), "code"));
        store.create_collection(2, true).await.unwrap();
        let (results, vectors): (Vec<_>, Vec<_>) = seeds.into_iter().unzip();
        let chunks: Vec<Chunk> = results.into_iter().map(|r| r.chunk).collect();
        store.index_chunks(&chunks, vectors, 100).await.unwrap();
        let embedder = Arc::new(Embedder::new(provider, 2, Duration::from_secs(5)));
        CodeRetriever::new(embedder, store, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn empty_query_rejected_before_embedding() {
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0]);
        let retriever = seeded_retriever(provider.clone(), Vec::new()).await;
        let err = retriever
            .retrieve_context("   ", 5, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::EmptyQuery));
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn no_match_above_threshold_is_empty() {
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0]);
        let retriever = seeded_retriever(
            provider,
            vec![(result(0.0, ChunkKind::Module, true, 1), vec![0.0, 1.0])],
        )
        .await;
        let results = retriever
            .retrieve_context("unrelated", 5, None, true)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn rerank_promotes_module_over_closer_window() {
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0]);
        let seeds = vec![
            (result(0.0, ChunkKind::TextChunk, false, 0), vec![1.0, 0.0]),
            (result(0.0, ChunkKind::TextChunk, false, 0), vec![1.0, 0.05]),
            (result(0.0, ChunkKind::Module, true, 3), vec![1.0, 0.2]),
        ];
        let retriever = seeded_retriever(provider, seeds).await;

        let reranked = retriever
            .retrieve_context("auth", 2, None, true)
            .await
            .unwrap();
        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].chunk.kind, ChunkKind::Module);

        let plain = retriever
            .retrieve_context("auth", 2, None, false)
            .await
            .unwrap();
        assert_eq!(plain.len(), 2);
        assert!(plain.iter().all(|r| r.chunk.kind == ChunkKind::TextChunk));
        assert!(plain[0].score >= plain[1].score);
    }

    #[tokio::test]
    async fn rerank_skipped_when_candidates_fit_in_k() {
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0]);
        let seeds = vec![
            (result(0.0, ChunkKind::TextChunk, false, 0), vec![1.0, 0.0]),
            (result(0.0, ChunkKind::Module, true, 3), vec![1.0, 0.2]),
        ];
        let retriever = seeded_retriever(provider, seeds).await;

        let results = retriever
            .retrieve_context("auth", 2, None, true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        // The boosted module would outrank the window if re-ranking ran.
        assert!(adjusted_score(&results[1]) > adjusted_score(&results[0]));
        assert_eq!(results[0].chunk.kind, ChunkKind::TextChunk);
        assert_eq!(results[1].chunk.kind, ChunkKind::Module);
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn repo_filter_restricts_results() {
        let provider = MockProvider::default().with_embedding(vec![1.0, 0.0]);
        let mut other = result(0.0, ChunkKind::Module, false, 0);
        other.chunk.repo = "other".into();
        let seeds = vec![
            (result(0.0, ChunkKind::Module, false, 0), vec![1.0, 0.0]),
            (other, vec![1.0, 0.0]),
        ];
        let retriever = seeded_retriever(provider, seeds).await;
        let results = retriever
            .retrieve_context("q", 5, Some("other"), true)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.repo, "other");
    }
}
