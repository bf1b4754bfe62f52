//! LLM provider abstraction: chat generation and text embeddings behind one trait.

pub mod any;
pub mod claude;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;
pub(crate) mod retry;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
