//! Lobby Hub - lobby command ingestion and lobby discovery
//!
//! This crate consumes player commands from an AMQP queue, validates their
//! ownership and seats players into lobbies, and serves lobby search,
//! featured listings and stats from an indexed in-memory store.

pub mod amqp;
pub mod config;
pub mod error;
pub mod lobby;
pub mod metrics;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LobbyHubError, Result, StoreError, StoreResult};
pub use types::*;

// Re-export key components
pub use amqp::{CommandConsumer, CommandHandler, CommandPublisher};
pub use lobby::{InMemoryLobbyStore, LobbyManager, LobbyRepository, LobbySearchFilter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
