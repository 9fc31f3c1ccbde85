//! Error types for the reconciliation domain.

/// The result type used throughout fresco-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating or driving reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in the dependency graph.
    #[error("cycle detected in dependency graph: {cycle:?}")]
    CycleDetected {
        /// Assets participating in (or blocked behind) the cycle.
        cycle: Vec<String>,
    },

    /// An asset declares an upstream that is not part of the graph.
    #[error("asset {asset} depends on undeclared asset {upstream}")]
    DanglingDependency {
        /// The declaring asset.
        asset: String,
        /// The missing upstream key.
        upstream: String,
    },

    /// The same asset key was declared twice.
    #[error("duplicate asset declaration: {asset}")]
    DuplicateAsset {
        /// The duplicated key.
        asset: String,
    },

    /// An asset was not found in the graph.
    #[error("asset not found: {asset}")]
    AssetNotFound {
        /// The missing key.
        asset: String,
    },

    /// A DAG node was not found (internal graph operation error).
    #[error("DAG node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier (index or value).
        node: String,
    },

    /// The execution backend rejected or could not receive a submission.
    #[error("submission failed: {message}")]
    Submission {
        /// Description of the failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from fresco-core.
    #[error("core error: {0}")]
    Core(#[from] fresco_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new submission error.
    #[must_use]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true for graph integrity violations (cycles, dangling or
    /// duplicate declarations).
    ///
    /// These abort the current tick but are expected to heal once the
    /// declarations are corrected.
    #[must_use]
    pub const fn is_graph_integrity(&self) -> bool {
        matches!(
            self,
            Self::CycleDetected { .. }
                | Self::DanglingDependency { .. }
                | Self::DuplicateAsset { .. }
                | Self::DagNodeNotFound { .. }
        )
    }
}
