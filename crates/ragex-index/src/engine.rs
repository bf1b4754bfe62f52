//! Question answering: retrieve, build the prompt, generate under a timeout.

use std::sync::Arc;
use std::time::Duration;

use ragex_llm::{LlmProvider, Message};
use ragex_store::vector_store::BoxFuture;

use crate::error::{IndexError, Result};
use crate::prompt::PromptBuilder;
use crate::retriever::CodeRetriever;
use crate::store::StoreStats;

/// Answer returned when retrieval finds nothing relevant.
pub const NO_RELEVANT_CODE: &str = "No relevant code found in the codebase.";

/// Retrieval-augmented question answering over the indexed code.
///
/// `P` generates answers, `E` embeds questions. Holds no per-query state.
pub struct RagEngine<P, E> {
    generator: P,
    retriever: Arc<CodeRetriever<E>>,
    prompt: PromptBuilder,
    llm_timeout: Duration,
}

impl<P, E> std::fmt::Debug for RagEngine<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagEngine")
            .field("retriever", &self.retriever)
            .field("llm_timeout", &self.llm_timeout)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider, E: LlmProvider> RagEngine<P, E> {
    #[must_use]
    pub fn new(
        generator: P,
        retriever: Arc<CodeRetriever<E>>,
        prompt: PromptBuilder,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            retriever,
            prompt,
            llm_timeout,
        }
    }

    #[must_use]
    pub fn generator(&self) -> &P {
        &self.generator
    }

    #[must_use]
    pub fn retriever(&self) -> &CodeRetriever<E> {
        &self.retriever
    }

    /// Answer `question` from the `k` most relevant chunks.
    ///
    /// Returns [`NO_RELEVANT_CODE`] without calling the generator when nothing
    /// passes the score threshold.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmptyQuery`] for a blank question,
    /// [`IndexError::Timeout`] when generation exceeds the configured limit, or
    /// any retrieval or provider error.
    pub async fn query(
        &self,
        question: &str,
        k: usize,
        repo_filter: Option<&str>,
    ) -> Result<String> {
        let rerank = self.retriever.config().rerank;
        let context = self
            .retriever
            .retrieve_context(question, k, repo_filter, rerank)
            .await?;

        if context.is_empty() {
            tracing::info!(k, repo = repo_filter, "no relevant code found");
            return Ok(NO_RELEVANT_CODE.to_owned());
        }
        for (i, result) in context.iter().enumerate() {
            tracing::debug!(
                rank = i + 1,
                score = result.score,
                file = %result.chunk.file,
                module = result.chunk.module.as_deref(),
                "context"
            );
        }

        let prompt = self.prompt.build_prompt(question, &context);
        let messages = [Message::user(prompt)];
        let answer = tokio::time::timeout(self.llm_timeout, self.generator.chat(&messages))
            .await
            .map_err(|_| IndexError::Timeout {
                operation: "generation",
                seconds: self.llm_timeout.as_secs(),
            })??;

        tracing::info!(
            provider = self.generator.name(),
            contexts = context.len(),
            answer_len = answer.len(),
            "query answered"
        );
        Ok(answer)
    }

    /// # Errors
    ///
    /// See [`crate::store::CodeStore::stats`].
    pub async fn stats(&self) -> Result<StoreStats> {
        self.retriever.store().stats().await
    }
}

/// Object-safe view of the engine for callers that should not carry its
/// provider type parameters.
pub trait RagService: Send + Sync {
    fn query<'a>(
        &'a self,
        question: &'a str,
        k: usize,
        repo_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>>;

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats>>;
}

impl<P, E> RagService for RagEngine<P, E>
where
    P: LlmProvider + 'static,
    E: LlmProvider + 'static,
{
    fn query<'a>(
        &'a self,
        question: &'a str,
        k: usize,
        repo_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(RagEngine::query(self, question, k, repo_filter))
    }

    fn stats(&self) -> BoxFuture<'_, Result<StoreStats>> {
        Box::pin(RagEngine::stats(self))
    }
}
