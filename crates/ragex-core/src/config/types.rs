use std::path::PathBuf;

use ragex_index::indexer::RepoSource;
use ragex_index::{ChunkerConfig, PromptConfig, RetrievalConfig};
use serde::{Deserialize, Serialize};

use crate::vault::Secret;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Generation backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ollama,
    Claude,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Claude => "claude",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "codestral".into()
}

pub(crate) fn default_embedding_model() -> String {
    "jina/jina-embeddings-v2-base-code".into()
}

#[allow(clippy::unnecessary_wraps)]
fn default_fallback_embedding_model() -> Option<String> {
    Some("all-minilm".into())
}

#[allow(clippy::unnecessary_wraps)]
fn default_cloud() -> Option<CloudLlmConfig> {
    Some(CloudLlmConfig::default())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Ollama server used for embeddings and, with the `ollama` provider, generation.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Probed when `embedding_model` is unavailable. `None` disables the fallback.
    #[serde(default = "default_fallback_embedding_model")]
    pub fallback_embedding_model: Option<String>,
    #[serde(default = "default_cloud")]
    pub cloud: Option<CloudLlmConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            fallback_embedding_model: default_fallback_embedding_model(),
            cloud: default_cloud(),
        }
    }
}

fn default_cloud_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn default_cloud_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudLlmConfig {
    #[serde(default = "default_cloud_model")]
    pub model: String,
    #[serde(default = "default_cloud_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CloudLlmConfig {
    fn default() -> Self {
        Self {
            model: default_cloud_model(),
            max_tokens: default_cloud_max_tokens(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "code_chunks".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Qdrant gRPC endpoint.
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
        }
    }
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_upload_batch_size() -> usize {
    100
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("index_metadata.json")
}

fn default_enhance_embeddings() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
    #[serde(default = "default_enhance_embeddings")]
    pub enhance_embeddings: bool,
    /// Repositories indexed when `ragex index` gets no paths.
    #[serde(default)]
    pub repos: Vec<RepoSource>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embed_batch_size: default_embed_batch_size(),
            upload_batch_size: default_upload_batch_size(),
            metadata_path: default_metadata_path(),
            enhance_embeddings: default_enhance_embeddings(),
            repos: Vec::new(),
        }
    }
}

fn default_gateway_bind() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    5001
}

fn default_gateway_rate_limit() -> u32 {
    120
}

fn default_gateway_max_body() -> usize {
    1_048_576
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Requests per minute per client IP; 0 disables limiting.
    #[serde(default = "default_gateway_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_gateway_max_body")]
    pub max_body_size: usize,
    /// Model name advertised to clients. Defaults to `llm.model`.
    #[serde(default)]
    pub model_name: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: None,
            rate_limit: default_gateway_rate_limit(),
            max_body_size: default_gateway_max_body(),
            model_name: None,
        }
    }
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_seconds: default_llm_timeout(),
            embedding_seconds: default_embedding_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub claude_api_key: Option<Secret>,
}
