//! Contracts consumed from upstream collaborators.
//!
//! The raw canonical catalog is imported and decoded upstream; this crate
//! consumes the decoded entries through [`CatalogSource`]. Destination
//! paths likewise come from a [`DestinationResolver`] the job manager
//! treats as opaque.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::model::{CatalogEntry, ProviderId};

/// Errors from the canonical catalog source.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog for this console could not be loaded.
    ///
    /// Fatal to the console session; reported, never retried automatically,
    /// and never replaced by silently-truncated data.
    #[error("catalog unavailable for console {console}: {reason}")]
    Unavailable {
        /// The console identifier.
        console: String,
        /// Why the load failed.
        reason: String,
    },
}

impl CatalogError {
    /// Creates an unavailable error.
    pub fn unavailable(console: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            console: console.into(),
            reason: reason.into(),
        }
    }
}

/// Yields the immutable catalog entry sequence for a console.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Loads all entries for `console`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] on any failure; partial data
    /// is never returned.
    async fn load(&self, console: &str) -> Result<Vec<CatalogEntry>, CatalogError>;
}

/// Decoded catalog export file: `{ "console": ..., "entries": [...] }`.
#[derive(Debug, Deserialize)]
struct CatalogExport {
    entries: Vec<CatalogEntry>,
}

/// Catalog source reading decoded JSON exports from a directory,
/// one `<console>.json` file per console.
#[derive(Debug, Clone)]
pub struct JsonCatalogSource {
    root: PathBuf,
}

impl JsonCatalogSource {
    /// Creates a source rooted at a directory of catalog exports.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl CatalogSource for JsonCatalogSource {
    #[instrument(skip(self))]
    async fn load(&self, console: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let path = self.root.join(format!("{console}.json"));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| CatalogError::unavailable(console, error.to_string()))?;
        let export: CatalogExport = serde_json::from_slice(&bytes)
            .map_err(|error| CatalogError::unavailable(console, error.to_string()))?;
        info!(
            console,
            entries = export.entries.len(),
            path = %path.display(),
            "loaded catalog export"
        );
        Ok(export.entries)
    }
}

/// Resolves the destination path for a downloaded artifact.
pub trait DestinationResolver: Send + Sync {
    /// Returns the filesystem path the artifact should land at.
    fn resolve(&self, entry: &CatalogEntry, provider: &ProviderId) -> PathBuf;
}

/// Default layout: `<root>/<console>/<entry name>`, path separators in the
/// entry name replaced so a listing name can never escape the library root.
#[derive(Debug, Clone)]
pub struct ConsoleLayoutResolver {
    root: PathBuf,
    console: String,
}

impl ConsoleLayoutResolver {
    /// Creates a resolver for one console's library directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, console: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            console: console.into(),
        }
    }
}

impl DestinationResolver for ConsoleLayoutResolver {
    fn resolve(&self, entry: &CatalogEntry, _provider: &ProviderId) -> PathBuf {
        let file_name: String = entry
            .name
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                other => other,
            })
            .collect();
        self.root.join(&self.console).join(file_name)
    }
}
