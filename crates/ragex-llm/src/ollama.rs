use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message, Role};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = split_base_url(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
        }
    }

    /// Same server and chat model, different embedding model.
    #[must_use]
    pub fn with_embedding_model(&self, embedding_model: String) -> Self {
        Self {
            client: self.client.clone(),
            model: self.model.clone(),
            embedding_model,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Unavailable`] if the server cannot be contacted.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Unavailable(format!("failed to connect to Ollama, is it running? {e}"))
        })?;
        Ok(())
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| request_error("chat", &e))?;

        if response.message.content.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "ollama" });
        }
        Ok(response.message.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| request_error("embedding", &e))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse { provider: "ollama" })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| request_error("embedding", &e))?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::Other(format!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            )));
        }
        Ok(response.embeddings)
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::Assistant => ChatMessage::assistant(text),
        Role::User => ChatMessage::user(text),
    }
}

const DEFAULT_PORT: u16 = 11434;

/// `http://host:port/` into the `(scheme://host, port)` pair `Ollama::new` takes.
fn split_base_url(url: &str) -> (String, u16) {
    let url = url.trim().trim_end_matches('/');
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (format!("{}{host}", &url[..authority_start]), port),
            Err(_) => (url.to_owned(), DEFAULT_PORT),
        },
        None => (url.to_owned(), DEFAULT_PORT),
    }
}

/// Connection failures become [`LlmError::Unavailable`] so callers can fall
/// back or answer 503. `ollama-rs` flattens transport errors into text.
fn request_error(operation: &str, err: &dyn std::fmt::Display) -> LlmError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("error sending request") || lower.contains("connect") {
        LlmError::Unavailable(format!("ollama {operation} request failed: {message}"))
    } else {
        LlmError::Other(format!("ollama {operation} request failed: {message}"))
    }
}
