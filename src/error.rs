//! Error types for envtrack-ingest.

use thiserror::Error;

use crate::protocol::{ProtocolAction, ServerState};

/// Main error type for all ingestion operations.
#[derive(Debug, Error)]
pub enum IngestError {
    /// I/O error during socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config, station file, sink).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Write would exceed the bounded receive buffer.
    #[error("Capacity exceeded: requested {requested} bytes, {remaining} remaining")]
    Capacity { requested: usize, remaining: usize },

    /// Action not allowed in the current protocol state.
    #[error("Invalid action \"{action}\" in state \"{state}\"")]
    InvalidTransition {
        state: ServerState,
        action: ProtocolAction,
    },

    /// Inbound frame grew past the configured maximum without a delimiter.
    #[error("Frame of {length} bytes exceeds maximum {max}")]
    FrameTooLong { length: usize, max: usize },

    /// Station registry lookup failed.
    #[error("Station registry error: {0}")]
    Registry(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using IngestError.
pub type Result<T> = std::result::Result<T, IngestError>;
