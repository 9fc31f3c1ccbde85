//! Error types and result aliases shared by fresco crates.

/// The result type used throughout fresco-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "bad ulid".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn internal_helper_builds_variant() {
        let err = Error::internal("unreachable state");
        assert!(matches!(err, Error::Internal { .. }));
        assert_eq!(err.to_string(), "internal error: unreachable state");
    }
}
