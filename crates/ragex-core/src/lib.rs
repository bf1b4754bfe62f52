//! Configuration, secrets, and application bootstrap shared by the ragex binary
//! and gateway.

pub mod bootstrap;
pub mod config;
pub mod vault;

pub use bootstrap::AppContext;
pub use config::Config;
