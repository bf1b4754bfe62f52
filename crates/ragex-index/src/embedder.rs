//! Embedding wrapper: dimension probe, fallback model, metadata-enhanced chunk text.

use std::time::Duration;

use ragex_llm::LlmProvider;

use crate::chunker::{Chunk, ChunkKind};
use crate::error::{IndexError, Result};

const PROBE_TEXT: &str = "probe";

/// Fixed-dimension text encoder over an embedding-capable provider.
#[derive(Debug, Clone)]
pub struct Embedder<E> {
    provider: E,
    dimension: usize,
    timeout: Duration,
}

impl<E: LlmProvider> Embedder<E> {
    /// Wrap a provider whose output dimension is already known.
    #[must_use]
    pub fn new(provider: E, dimension: usize, timeout: Duration) -> Self {
        Self {
            provider,
            dimension,
            timeout,
        }
    }

    /// Discover the embedding dimension with a probe request.
    ///
    /// When the primary model fails and a fallback is given, the fallback is
    /// probed instead and used from then on.
    ///
    /// # Errors
    ///
    /// Returns the primary error when there is no fallback, or the fallback's
    /// error when both fail.
    pub async fn probe(primary: E, fallback: Option<E>, timeout: Duration) -> Result<Self> {
        match probe_dimension(&primary, timeout).await {
            Ok(dimension) => {
                tracing::info!(provider = primary.name(), dimension, "embedding model ready");
                Ok(Self::new(primary, dimension, timeout))
            }
            Err(e) => {
                let Some(fallback) = fallback else {
                    return Err(e);
                };
                tracing::warn!(
                    provider = primary.name(),
                    error = %e,
                    "primary embedding model unavailable, trying fallback"
                );
                let dimension = probe_dimension(&fallback, timeout).await?;
                tracing::info!(
                    provider = fallback.name(),
                    dimension,
                    "fallback embedding model ready"
                );
                Ok(Self::new(fallback, dimension, timeout))
            }
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn provider(&self) -> &E {
        &self.provider
    }

    /// # Errors
    ///
    /// Returns an error if the provider fails, times out, or returns a vector
    /// of the wrong size.
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout(self.timeout, self.provider.embed(text))
            .await
            .map_err(|_| self.timeout_error())??;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Encode `texts` in groups of `batch_size`, preserving input order.
    ///
    /// # Errors
    ///
    /// Fails on the first batch that errors.
    pub async fn encode_batch(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(batch_size.max(1)).enumerate() {
            let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
                .await
                .map_err(|_| self.timeout_error())??;
            if vectors.len() != batch.len() {
                return Err(IndexError::LengthMismatch {
                    chunks: batch.len(),
                    embeddings: vectors.len(),
                });
            }
            for vector in &vectors {
                self.check_dimension(vector)?;
            }
            tracing::debug!(batch = i, size = batch.len(), "embedded batch");
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Encode a chunk through its metadata-enhanced text.
    ///
    /// # Errors
    ///
    /// See [`Embedder::encode`].
    pub async fn encode_chunk(&self, chunk: &Chunk) -> Result<Vec<f32>> {
        self.encode(&enhanced_text(chunk)).await
    }

    /// # Errors
    ///
    /// See [`Embedder::encode_batch`].
    pub async fn encode_chunks(
        &self,
        chunks: &[Chunk],
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(enhanced_text).collect();
        self.encode_batch(&texts, batch_size).await
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }

    fn timeout_error(&self) -> IndexError {
        IndexError::Timeout {
            operation: "embedding",
            seconds: self.timeout.as_secs(),
        }
    }
}

async fn probe_dimension<E: LlmProvider>(provider: &E, timeout: Duration) -> Result<usize> {
    let vector = tokio::time::timeout(timeout, provider.embed(PROBE_TEXT))
        .await
        .map_err(|_| IndexError::Timeout {
            operation: "embedding probe",
            seconds: timeout.as_secs(),
        })??;
    if vector.is_empty() {
        return Err(IndexError::Other(format!(
            "{} returned an empty probe embedding",
            provider.name()
        )));
    }
    Ok(vector.len())
}

/// Chunk text prefixed with module, function, and kind lines so the vector
/// carries the structural context.
#[must_use]
pub fn enhanced_text(chunk: &Chunk) -> String {
    let mut preamble = Vec::new();
    if let Some(module) = &chunk.module {
        preamble.push(format!("Module: {module}"));
    }
    if let Some(functions) = chunk.functions.as_ref().filter(|f| !f.is_empty()) {
        preamble.push(format!("Functions: {}", functions.join(", ")));
    }
    if chunk.kind == ChunkKind::Module {
        preamble.push("Type: Complete Module".to_owned());
    }

    if preamble.is_empty() {
        chunk.text.clone()
    } else {
        format!("{}\n\n{}", preamble.join("\n"), chunk.text)
    }
}
