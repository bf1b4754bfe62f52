//! Offline indexing: chunk repositories, embed the chunks, and load them into
//! a fresh collection.

use std::path::PathBuf;
use std::time::Instant;

use ragex_llm::LlmProvider;
use serde::{Deserialize, Serialize};

use crate::chunker::{self, ChunkerConfig, FileFailure};
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::store::CodeStore;

/// A repository checkout to index under a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub name: String,
    pub path: PathBuf,
}

impl RepoSource {
    /// Name the repository after the last component of `path`.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self { name, path }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub embed_batch_size: usize,
    pub upload_batch_size: usize,
    /// Embed chunks with a module/function preamble instead of raw text.
    pub enhance_embeddings: bool,
    /// Drop the existing collection before loading.
    pub reset: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            embed_batch_size: 32,
            upload_batch_size: 100,
            enhance_embeddings: true,
            reset: true,
        }
    }
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub repos: Vec<String>,
    pub files_scanned: usize,
    pub chunks_created: usize,
    pub embedding_dim: usize,
    pub errors: Vec<FileFailure>,
    pub duration_ms: u64,
}

/// Chunk, embed, and store every repository in `repos`.
///
/// Unreadable files are skipped and listed in the report. Nothing is written
/// to the store until every chunk has been embedded.
///
/// # Errors
///
/// Returns [`IndexError::NothingToIndex`] when no chunks were produced, or the
/// first embedding or store error.
pub async fn index_repositories<E: LlmProvider>(
    repos: &[RepoSource],
    chunker_config: &ChunkerConfig,
    embedder: &Embedder<E>,
    store: &CodeStore,
    options: IndexOptions,
) -> Result<IndexReport> {
    let started = Instant::now();
    let mut report = IndexReport {
        embedding_dim: embedder.dimension(),
        ..IndexReport::default()
    };
    let mut chunks = Vec::new();

    for repo in repos {
        if !repo.path.is_dir() {
            tracing::warn!(
                repo = %repo.name,
                path = %repo.path.display(),
                "repository path not found, skipping"
            );
            report.errors.push(FileFailure {
                file: repo.path.display().to_string(),
                error: "repository path not found".into(),
            });
            continue;
        }
        let scanned = chunker::chunk_repository(&repo.path, &repo.name, chunker_config).await;
        tracing::info!(
            repo = %repo.name,
            files = scanned.files_scanned,
            chunks = scanned.chunks.len(),
            failures = scanned.failures.len(),
            "repository chunked"
        );
        report.repos.push(repo.name.clone());
        report.files_scanned += scanned.files_scanned;
        report.errors.extend(scanned.failures);
        chunks.extend(scanned.chunks);
    }

    if chunks.is_empty() {
        return Err(IndexError::NothingToIndex);
    }

    tracing::info!(
        chunks = chunks.len(),
        enhanced = options.enhance_embeddings,
        "embedding chunks"
    );
    let embeddings = if options.enhance_embeddings {
        embedder
            .encode_chunks(&chunks, options.embed_batch_size)
            .await?
    } else {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        embedder
            .encode_batch(&texts, options.embed_batch_size)
            .await?
    };

    store
        .create_collection(embedder.dimension(), options.reset)
        .await?;
    report.chunks_created = store
        .index_chunks(&chunks, embeddings, options.upload_batch_size)
        .await?;
    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    tracing::info!(
        collection = store.collection(),
        chunks = report.chunks_created,
        files = report.files_scanned,
        errors = report.errors.len(),
        duration_ms = report.duration_ms,
        "indexing complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use ragex_llm::mock::MockProvider;
    use ragex_store::InMemoryVectorStore;

    use super::*;

    fn write_repo(root: &Path) {
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::write(
            root.join("lib/user_auth.ex"),
            "defmodule UserAuth do\n  @moduledoc \"\"\"\n  Auth.\n  \"\"\"\n  def login(conn), do: conn\nend\n",
        )
        .unwrap();
        std::fs::write(root.join("lib/seeds.exs"), "IO.puts(\"seeding\")\n").unwrap();
        std::fs::write(root.join("lib/bad.ex"), [0xc3, 0x28]).unwrap();
    }

    fn setup() -> (Embedder<MockProvider>, CodeStore, MockProvider) {
        let provider = MockProvider::default().with_embedding(vec![0.3, 0.7]);
        let embedder = Embedder::new(provider.clone(), 2, Duration::from_secs(5));
        let store = CodeStore::new(Arc::new(InMemoryVectorStore::new()), "code");
        (embedder, store, provider)
    }

    #[test]
    fn repo_name_from_path() {
        let repo = RepoSource::from_path("/work/checkouts/billing");
        assert_eq!(repo.name, "billing");
    }

    #[tokio::test]
    async fn indexes_repository_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        write_repo(&root);
        let (embedder, store, provider) = setup();

        let report = index_repositories(
            &[RepoSource::from_path(&root)],
            &ChunkerConfig::default(),
            &embedder,
            &store,
            IndexOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.repos, vec!["app"]);
        assert_eq!(report.files_scanned, 3);
        assert_eq!(report.chunks_created, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.embedding_dim, 2);
        assert_eq!(provider.embed_calls(), 2);
        assert_eq!(store.stats().await.unwrap().total_points, 2);
    }

    #[tokio::test]
    async fn missing_repository_is_recorded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        write_repo(&root);
        let (embedder, store, _) = setup();

        let report = index_repositories(
            &[
                RepoSource::from_path(dir.path().join("missing")),
                RepoSource::from_path(&root),
            ],
            &ChunkerConfig::default(),
            &embedder,
            &store,
            IndexOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.repos, vec!["app"]);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn empty_repository_is_nothing_to_index() {
        let dir = tempfile::tempdir().unwrap();
        let (embedder, store, _) = setup();
        let err = index_repositories(
            &[RepoSource::from_path(dir.path())],
            &ChunkerConfig::default(),
            &embedder,
            &store,
            IndexOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexError::NothingToIndex));
    }

    #[tokio::test]
    async fn embedding_failure_leaves_collection_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        write_repo(&root);
        let embedder = Embedder::new(MockProvider::failing(), 2, Duration::from_secs(5));
        let store = CodeStore::new(Arc::new(InMemoryVectorStore::new()), "code");

        let err = index_repositories(
            &[RepoSource::from_path(&root)],
            &ChunkerConfig::default(),
            &embedder,
            &store,
            IndexOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IndexError::Llm(_)));
        assert!(store.stats().await.is_err());
    }
}
