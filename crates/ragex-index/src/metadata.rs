//! Indexing metadata record, persisted as a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indexer::IndexReport;

/// Summary of the last successful indexing run, kept beside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub repos: Vec<String>,
    pub total_chunks: usize,
    pub embedding_dim: usize,
    pub collection_name: String,
    /// RFC 3339 timestamp.
    pub indexed_at: String,
}

impl IndexMetadata {
    #[must_use]
    pub fn from_report(report: &IndexReport, collection_name: &str) -> Self {
        Self {
            repos: report.repos.clone(),
            total_chunks: report.chunks_created,
            embedding_dim: report.embedding_dim,
            collection_name: collection_name.to_owned(),
            indexed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!(path = %path.display(), "index metadata saved");
        Ok(())
    }

    /// Read the record, or `None` if no index run has written one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
