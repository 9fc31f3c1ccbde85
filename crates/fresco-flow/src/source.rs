//! Asset declaration sources.
//!
//! The reconciler asks its [`DefinitionSource`] for a fresh graph snapshot at
//! the start of every tick, so declaration changes are observed between
//! ticks and never mid-evaluation.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::asset::AssetDefinition;
use crate::error::{Error, Result};
use crate::graph::AssetGraph;

/// Supplies the current asset declarations.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Returns a validated snapshot of the current declarations.
    ///
    /// # Errors
    ///
    /// Returns a graph-integrity error for invalid declarations, or a
    /// storage/serialization error if they cannot be read.
    async fn load(&self) -> Result<Arc<AssetGraph>>;
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Declarations held in memory and replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticDefinitionSource {
    definitions: RwLock<Vec<AssetDefinition>>,
}

impl StaticDefinitionSource {
    /// Creates a source serving `definitions`.
    #[must_use]
    pub fn new(definitions: Vec<AssetDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// Replaces the declarations. Takes effect at the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn replace(&self, definitions: Vec<AssetDefinition>) -> Result<()> {
        *self.definitions.write().map_err(poison_err)? = definitions;
        Ok(())
    }

    /// Applies `update` to the declarations in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn update(&self, update: impl FnOnce(&mut Vec<AssetDefinition>)) -> Result<()> {
        let mut definitions = self.definitions.write().map_err(poison_err)?;
        update(&mut definitions);
        Ok(())
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitionSource {
    async fn load(&self) -> Result<Arc<AssetGraph>> {
        let definitions = self.definitions.read().map_err(poison_err)?.clone();
        AssetGraph::from_definitions(definitions).map(Arc::new)
    }
}

/// Declarations read from a JSON file (an array of asset definitions) on
/// every load.
#[derive(Debug, Clone)]
pub struct JsonFileDefinitionSource {
    path: PathBuf,
}

impl JsonFileDefinitionSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Parses a JSON array of asset definitions into a graph.
///
/// # Errors
///
/// Returns [`Error::Serialization`] for malformed JSON, or a graph-integrity
/// error for invalid declarations.
pub fn graph_from_json(json: &str) -> Result<AssetGraph> {
    let definitions: Vec<AssetDefinition> =
        serde_json::from_str(json).map_err(|e| Error::Serialization {
            message: format!("invalid asset declarations: {e}"),
        })?;
    AssetGraph::from_definitions(definitions)
}

#[async_trait]
impl DefinitionSource for JsonFileDefinitionSource {
    async fn load(&self) -> Result<Arc<AssetGraph>> {
        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::storage_with_source(
                format!("failed to read asset declarations from {}", self.path.display()),
                e,
            )
        })?;
        graph_from_json(&json).map(Arc::new)
    }
}
