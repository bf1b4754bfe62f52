use ragex_index::indexer::RepoSource;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();
        self.apply_env_overrides_serving();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("RAGEX_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid RAGEX_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("RAGEX_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("RAGEX_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("RAGEX_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("RAGEX_LLM_FALLBACK_EMBEDDING_MODEL") {
            self.llm.fallback_embedding_model = (!v.trim().is_empty()).then_some(v);
        }
        if let Ok(v) = std::env::var("RAGEX_CLAUDE_MODEL") {
            self.llm.cloud.get_or_insert_with(Default::default).model = v;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("RAGEX_QDRANT_URL") {
            self.store.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("RAGEX_COLLECTION") {
            self.store.collection = v;
        }
        if let Ok(v) = std::env::var("RAGEX_CHUNK_MAX_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunker.max_chunk_chars = n;
        }
        if let Ok(v) = std::env::var("RAGEX_RETRIEVAL_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.k = k;
        }
        if let Ok(v) = std::env::var("RAGEX_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = t.clamp(-1.0, 1.0);
        }
        if let Ok(v) = std::env::var("RAGEX_RETRIEVAL_RERANK")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.retrieval.rerank = enabled;
        }
        if let Ok(v) = std::env::var("RAGEX_INDEX_METADATA_PATH") {
            self.index.metadata_path = v.into();
        }
        if let Ok(v) = std::env::var("RAGEX_INDEX_REPOS") {
            self.index.repos = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(RepoSource::from_path)
                .collect();
        }
    }

    fn apply_env_overrides_serving(&mut self) {
        if let Ok(v) = std::env::var("RAGEX_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("RAGEX_GATEWAY_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.gateway.port = port;
        }
        if let Ok(v) = std::env::var("RAGEX_GATEWAY_MODEL_NAME") {
            self.gateway.model_name = Some(v);
        }
        if let Ok(v) = std::env::var("RAGEX_TIMEOUT_LLM")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.llm_seconds = secs;
        }
        if let Ok(v) = std::env::var("RAGEX_TIMEOUT_EMBEDDING")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.embedding_seconds = secs;
        }
    }
}
