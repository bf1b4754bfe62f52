//! Application bootstrap: config resolution and construction of the long-lived
//! provider, embedder, store, and engine handles.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ragex_index::indexer::{self, IndexOptions, IndexReport, RepoSource};
use ragex_index::{
    CodeRetriever, CodeStore, Embedder, IndexMetadata, PromptBuilder, RagEngine, RagService,
};
use ragex_llm::claude::ClaudeProvider;
use ragex_llm::ollama::OllamaProvider;
use ragex_llm::{AnyProvider, LlmProvider};
use ragex_store::{QdrantOps, VectorStore};

use crate::config::{CLAUDE_API_KEY_VARS, Config, ProviderKind};
use crate::vault::EnvVaultProvider;

/// Priority: `--config` > `RAGEX_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("RAGEX_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// Load, validate, and resolve secrets from the environment.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or a value is invalid.
pub async fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = Config::load(path)?;
    config.validate()?;
    config.resolve_secrets(&EnvVaultProvider).await?;
    Ok(config)
}

/// Build the generation backend named by `llm.provider`.
///
/// # Errors
///
/// Returns an error if the Claude section or API key is missing.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        )
        .into()),
        ProviderKind::Claude => {
            let cloud = config
                .llm
                .cloud
                .as_ref()
                .context("llm.cloud config section required for claude provider")?;
            let api_key = config
                .secrets
                .claude_api_key
                .as_ref()
                .with_context(|| {
                    format!(
                        "{} not found (also checked {})",
                        CLAUDE_API_KEY_VARS[0], CLAUDE_API_KEY_VARS[1]
                    )
                })?
                .expose()
                .to_owned();
            let client = ragex_llm::http::default_client(Duration::from_secs(
                config.timeouts.llm_seconds,
            ))?;
            Ok(ClaudeProvider::new(api_key, cloud.model.clone(), cloud.max_tokens)
                .with_client(client)
                .into())
        }
    }
}

/// Primary and optional fallback embedding backends, both served by Ollama.
#[must_use]
pub fn create_embedding_providers(config: &Config) -> (OllamaProvider, Option<OllamaProvider>) {
    let primary = OllamaProvider::new(
        &config.llm.base_url,
        config.llm.model.clone(),
        config.llm.embedding_model.clone(),
    );
    let fallback = config
        .llm
        .fallback_embedding_model
        .as_ref()
        .filter(|m| **m != config.llm.embedding_model)
        .map(|m| primary.with_embedding_model(m.clone()));
    (primary, fallback)
}

/// # Errors
///
/// Returns an error if the Qdrant URL is invalid.
pub fn create_vector_store(config: &Config) -> anyhow::Result<Arc<dyn VectorStore>> {
    let ops = QdrantOps::new(&config.store.qdrant_url)
        .with_context(|| format!("invalid qdrant url {}", config.store.qdrant_url))?;
    Ok(Arc::new(ops))
}

pub async fn health_check(provider: &AnyProvider) {
    if let AnyProvider::Ollama(ollama) = provider {
        match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        }
    }
}

/// Handles shared by every command, built once at startup.
pub struct AppContext<P = AnyProvider, E = OllamaProvider> {
    config: Config,
    embedder: Arc<Embedder<E>>,
    store: Arc<CodeStore>,
    engine: Arc<RagEngine<P, E>>,
}

impl AppContext {
    /// Build every handle from configuration.
    ///
    /// The embedding model is probed here, so an unreachable embedding backend
    /// fails startup rather than the first query.
    ///
    /// # Errors
    ///
    /// Returns an error if a provider cannot be created or no embedding model
    /// answers the probe.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let generator = create_provider(&config)?;
        health_check(&generator).await;

        let (primary, fallback) = create_embedding_providers(&config);
        let embedder = Embedder::probe(
            primary,
            fallback,
            Duration::from_secs(config.timeouts.embedding_seconds),
        )
        .await
        .context("no embedding model available")?;

        let store = create_vector_store(&config)?;
        tracing::info!(
            provider = generator.name(),
            model = generator.model(),
            embedding_model = embedder.provider().embedding_model(),
            dimension = embedder.dimension(),
            collection = %config.store.collection,
            "application context ready"
        );
        Ok(Self::from_parts(config, generator, embedder, store))
    }
}

impl<P, E> AppContext<P, E>
where
    P: LlmProvider + 'static,
    E: LlmProvider + 'static,
{
    /// Assemble a context from already-constructed parts.
    #[must_use]
    pub fn from_parts(
        config: Config,
        generator: P,
        embedder: Embedder<E>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let store = Arc::new(CodeStore::new(vector_store, config.store.collection.clone()));
        let retriever = Arc::new(CodeRetriever::new(
            embedder.clone(),
            store.clone(),
            config.retrieval.clone(),
        ));
        let engine = Arc::new(RagEngine::new(
            generator,
            retriever,
            PromptBuilder::new(&config.prompt),
            Duration::from_secs(config.timeouts.llm_seconds),
        ));
        Self {
            config,
            embedder,
            store,
            engine,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn embedder(&self) -> &Embedder<E> {
        &self.embedder
    }

    #[must_use]
    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    #[must_use]
    pub fn engine(&self) -> &RagEngine<P, E> {
        &self.engine
    }

    /// The engine behind an object-safe handle for the HTTP layer.
    #[must_use]
    pub fn service(&self) -> Arc<dyn RagService> {
        self.engine.clone()
    }

    #[must_use]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            embed_batch_size: self.config.index.embed_batch_size,
            upload_batch_size: self.config.index.upload_batch_size,
            enhance_embeddings: self.config.index.enhance_embeddings,
            reset: true,
        }
    }

    /// Rebuild the collection from `repos` and record the run in the metadata file.
    ///
    /// # Errors
    ///
    /// Returns an error if indexing fails or the metadata file cannot be written.
    pub async fn index(&self, repos: &[RepoSource]) -> anyhow::Result<IndexReport> {
        let report = indexer::index_repositories(
            repos,
            &self.config.chunker,
            &self.embedder,
            &self.store,
            self.index_options(),
        )
        .await?;

        let metadata = IndexMetadata::from_report(&report, self.store.collection());
        metadata
            .save(&self.config.index.metadata_path)
            .await
            .with_context(|| {
                format!(
                    "failed to write {}",
                    self.config.index.metadata_path.display()
                )
            })?;
        Ok(report)
    }
}
