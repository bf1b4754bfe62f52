mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::vault::{Secret, VaultProvider};

/// Keys checked in order for the Anthropic API key.
pub const CLAUDE_API_KEY_VARS: [&str; 2] = ["RAGEX_CLAUDE_API_KEY", "ANTHROPIC_API_KEY"];

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Resolve sensitive configuration values through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(val) = vault.first_secret(&CLAUDE_API_KEY_VARS).await? {
            self.secrets.claude_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret("RAGEX_GATEWAY_TOKEN").await? {
            self.gateway.auth_token = Some(val);
        }
        Ok(())
    }

    /// Reject values that would fail later in a less obvious place.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.chunker.validate().map_err(anyhow::Error::msg)?;
        self.retrieval.validate().map_err(anyhow::Error::msg)?;

        if self.llm.provider == ProviderKind::Claude && self.llm.cloud.is_none() {
            bail!("llm.cloud config section required for claude provider");
        }
        if self.llm.embedding_model.trim().is_empty() {
            bail!("llm.embedding_model must not be empty");
        }
        if self.store.collection.trim().is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.index.embed_batch_size == 0 {
            bail!("index.embed_batch_size must be greater than 0");
        }
        if self.index.upload_batch_size == 0 {
            bail!("index.upload_batch_size must be greater than 0");
        }
        if self.timeouts.llm_seconds == 0 || self.timeouts.embedding_seconds == 0 {
            bail!("timeouts must be greater than 0 seconds");
        }
        if self.gateway.max_body_size == 0 {
            bail!("gateway.max_body_size must be greater than 0");
        }
        Ok(())
    }

    /// Model name the gateway reports to clients.
    #[must_use]
    pub fn advertised_model(&self) -> &str {
        if let Some(name) = self.gateway.model_name.as_deref() {
            return name;
        }
        match (self.llm.provider, self.llm.cloud.as_ref()) {
            (ProviderKind::Claude, Some(cloud)) => cloud.model.as_str(),
            _ => self.llm.model.as_str(),
        }
    }
}
