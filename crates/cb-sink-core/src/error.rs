//! Error types for the Couchbase sink pipeline
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.

use thiserror::Error;

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Primary error type for all sink operations
#[derive(Error, Debug)]
pub enum SinkError {
    /// Couchbase connection or mutation errors
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Target document does not exist
    ///
    /// The delete path treats this as success; the patch and conditional
    /// write paths surface it to the batch when document creation is
    /// disabled.
    #[error("Document not found: {id}")]
    NotFound { id: String },

    /// Record value serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation timeout
    #[error("Timeout: {operation} exceeded {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SinkError {
    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error with source
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Check if the batch is worth redelivering as-is
    ///
    /// Store and timeout failures are transient; configuration and
    /// serialization failures will fail again on every redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Timeout { .. })
    }

    /// Short label used for failure metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::NotFound { .. } => "not_found",
            Self::Serialization { .. } => "serialization",
            Self::Configuration { .. } => "configuration",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SinkError::store("connection reset").is_retryable());
        assert!(SinkError::timeout("replace", 30_000).is_retryable());
        assert!(!SinkError::config("bad mode").is_retryable());
        assert!(!SinkError::serialization("bad json").is_retryable());
    }
}
