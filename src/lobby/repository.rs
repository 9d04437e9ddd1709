//! Query and persistence contract of the lobby store

use crate::error::StoreResult;
use crate::lobby::indexes::{IndexReport, IndexSpec};
use crate::lobby::search::{LobbySearchFilter, Pagination, SearchPage};
use crate::lobby::stats::LobbyStats;
use crate::types::{Lobby, LobbyId, NewLobby};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Lobby persistence and read-side queries.
///
/// Every call is atomic on its own; there are no multi-record transactions,
/// so concurrent writers to the same lobby race and the last write wins.
/// Read queries return empty collections rather than absent ones.
#[async_trait]
pub trait LobbyRepository: Send + Sync {
    /// Apply index definitions. Failures are reported, never fatal.
    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> IndexReport;

    /// Persist a new lobby with a server-assigned id and timestamps
    async fn create(&self, lobby: NewLobby) -> StoreResult<Lobby>;

    /// Replace a stored lobby, keeping its creation time and refreshing `updated_at`
    async fn update(&self, lobby: Lobby) -> StoreResult<Lobby>;

    /// Remove a lobby. Returns whether a record was removed.
    async fn delete(&self, id: LobbyId) -> StoreResult<bool>;

    /// `Ok(None)` when absent, `Err` only when the store itself failed
    async fn get_by_id(&self, id: LobbyId) -> StoreResult<Option<Lobby>>;

    async fn search(
        &self,
        filter: &LobbySearchFilter,
        pagination: Pagination,
    ) -> StoreResult<SearchPage<Lobby>>;

    async fn get_featured(
        &self,
        game_id: Option<&str>,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Lobby>>;

    async fn get_stats(&self, game_id: Option<&str>) -> StoreResult<LobbyStats>;

    /// Drop every lobby whose `expires_at` is at or before `now`
    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    async fn count(&self) -> StoreResult<usize>;
}
