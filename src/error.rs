//! Error types for the lobby service
//!
//! Application seams use anyhow; the store and the ingestion pipeline expose
//! precise thiserror kinds so callers can tell "nothing to retry" from
//! "retry later".

use crate::types::LobbyId;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Result type of lobby store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Service-wide failures outside the store
#[derive(Debug, thiserror::Error)]
pub enum LobbyHubError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

/// Lobby store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Write against an id that is not stored. Reads signal absence with `None` instead.
    #[error("Lobby not found: {lobby_id}")]
    NotFound { lobby_id: LobbyId },

    #[error("Invalid lobby: {reason}")]
    InvalidLobby { reason: String },

    #[error("Lobby storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("Failed to create index '{index}': {reason}")]
    IndexCreation { index: String, reason: String },
}
