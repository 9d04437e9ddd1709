//! Lobby store and the queries served from it
//!
//! This module holds the lobby repository contract, the in-memory store with
//! its secondary indexes, search and featured ranking, stats aggregation and
//! the manager that seats queued players.

pub mod indexes;
pub mod manager;
pub mod provider;
pub mod repository;
pub mod search;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use indexes::{lobby_indexes, IndexKind, IndexReport, IndexSpec, LobbyField};
pub use manager::{LobbyManager, LobbyManagerStats, QueueOutcome};
pub use provider::{GameRules, GameRulesProvider, StaticGameRulesProvider};
pub use repository::LobbyRepository;
pub use search::{LobbySearchFilter, Pagination, SearchPage};
pub use stats::LobbyStats;
pub use store::{InMemoryLobbyStore, LobbyStoreConfig};
