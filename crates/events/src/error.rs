//! Error types for the events crate.

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Connection error for durable log setup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("invalid stream name '{0}': only ASCII letters, digits and '_' are allowed")]
    InvalidStreamName(String),

    #[error("database initialization failed: {reason}")]
    InitializationFailed { reason: String },
}

/// Bus error types.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Durable log or offset store operation failed.
    #[error("log store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// Node is not registered.
    #[error("node '{node_id}' not found")]
    NodeNotFound { node_id: NodeId },

    /// Frame does not match the message schema.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Channel closed.
    #[error("message channel closed")]
    ChannelClosed,

    /// A subscriber fell behind and missed messages.
    #[error("subscriber lagged, {skipped} messages skipped")]
    Lagged { skipped: u64 },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a node not found error.
    pub fn node_not_found(node_id: &NodeId) -> Self {
        Self::NodeNotFound {
            node_id: node_id.clone(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(err: ConnectionError) -> Self {
        Self::Connection(err)
    }

    /// Whether retrying the operation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreFailed { .. } | Self::Connection(_))
    }
}

impl From<surrealdb::Error> for Error {
    fn from(err: surrealdb::Error) -> Self {
        Self::store_failed("surrealdb", err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failed("append", "disk full");
        assert!(err.to_string().contains("append"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_node_not_found_names_node() {
        let err = Error::node_not_found(&NodeId::new("ui-7"));
        assert!(err.to_string().contains("ui-7"));
    }

    #[test]
    fn test_error_connection_conversion() {
        let conn_err = ConnectionError::InitializationFailed {
            reason: "rocksdb locked".to_string(),
        };
        let err = Error::connection(conn_err);
        assert!(err.to_string().contains("rocksdb locked"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_protocol_errors_are_not_transient() {
        assert!(!Error::protocol("missing field").is_transient());
    }
}
