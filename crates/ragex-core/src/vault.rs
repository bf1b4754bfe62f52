//! Secret lookup for API keys and the gateway token.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub type SecretFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>>;

/// A credential that never appears in `Debug` output or logs.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Where secrets come from.
pub trait VaultProvider: Send + Sync {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a>;

    /// Value of the first key in `keys` that is set.
    fn first_secret<'a>(&'a self, keys: &'a [&'a str]) -> SecretFuture<'a> {
        Box::pin(async move {
            for key in keys {
                if let Some(value) = self.get_secret(key).await? {
                    tracing::debug!(key, "secret resolved");
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }
}

/// Process environment. Blank values count as unset, so `KEY=` in a shell
/// profile does not mask a fallback key.
pub struct EnvVaultProvider;

impl VaultProvider for EnvVaultProvider {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        let value = std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Box::pin(std::future::ready(Ok(value)))
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MockVaultProvider {
    secrets: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MockVaultProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, key: &str, value: &str) -> Self {
        self.secrets.insert(key.to_owned(), value.to_owned());
        self
    }
}

#[cfg(test)]
impl VaultProvider for MockVaultProvider {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        Box::pin(std::future::ready(Ok(self.secrets.get(key).cloned())))
    }
}
