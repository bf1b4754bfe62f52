//! Ollama-compatible HTTP facade: chat and generate endpoints answered by the
//! retrieval engine, plus health and collection stats.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use server::GatewayServer;
