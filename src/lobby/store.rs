//! In-memory lobby store
//!
//! All state lives behind one `std::sync::RwLock`; every repository call takes
//! the lock once, so each write is atomic on its own. The lock is never held
//! across an await point.

use crate::error::{StoreError, StoreResult};
use crate::lobby::indexes::{IndexReport, IndexSet, IndexSpec};
use crate::lobby::repository::LobbyRepository;
use crate::lobby::search::{
    search_lobbies, select_featured, LobbySearchFilter, Pagination, SearchPage,
    DEFAULT_FEATURED_LIMIT,
};
use crate::lobby::stats::LobbyStats;
use crate::metrics::MetricsCollector;
use crate::types::{Lobby, LobbyId, NewLobby};
use crate::utils::{current_timestamp, generate_lobby_id, is_present};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the in-memory store
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyStoreConfig {
    /// Lifetime given to lobbies created without an explicit expiry
    pub default_lobby_ttl: Duration,
    /// Featured listing size when the caller asks for none
    pub featured_limit: usize,
}

impl Default for LobbyStoreConfig {
    fn default() -> Self {
        Self {
            default_lobby_ttl: Duration::from_secs(3600),
            featured_limit: DEFAULT_FEATURED_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    lobbies: HashMap<LobbyId, Lobby>,
    indexes: IndexSet,
}

impl StoreState {
    fn candidates(&self, ids: Option<HashSet<LobbyId>>) -> Vec<&Lobby> {
        match ids {
            Some(ids) => ids.iter().filter_map(|id| self.lobbies.get(id)).collect(),
            None => self.lobbies.values().collect(),
        }
    }

    fn remove(&mut self, id: &LobbyId) -> Option<Lobby> {
        let removed = self.lobbies.remove(id)?;
        self.indexes.remove(&removed);
        Some(removed)
    }
}

/// Lobby store holding every record in process memory
#[derive(Clone)]
pub struct InMemoryLobbyStore {
    state: Arc<RwLock<StoreState>>,
    config: LobbyStoreConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl InMemoryLobbyStore {
    pub fn new(config: LobbyStoreConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LobbyStoreConfig {
        &self.config
    }

    /// Names of the indexes currently built
    pub fn index_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.read()?.indexes.names())
    }

    /// Earliest pending expiry according to the TTL index
    pub fn next_expiry(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.read()?.indexes.next_deadline())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::Unavailable {
            message: "lobby store lock poisoned".to_string(),
        })
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::Unavailable {
            message: "lobby store lock poisoned".to_string(),
        })
    }

    fn default_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.default_lobby_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn record_size(&self, size: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_stored_lobbies(size);
        }
    }
}

impl Default for InMemoryLobbyStore {
    fn default() -> Self {
        Self::new(LobbyStoreConfig::default())
    }
}

fn validate_new_lobby(lobby: &NewLobby) -> StoreResult<()> {
    if !is_present(&lobby.game_id) {
        return Err(StoreError::InvalidLobby {
            reason: "gameId is required".to_string(),
        });
    }
    if !is_present(&lobby.creator_id) {
        return Err(StoreError::InvalidLobby {
            reason: "creatorId is required".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl LobbyRepository for InMemoryLobbyStore {
    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> IndexReport {
        let report = match self.write() {
            Ok(mut guard) => {
                let state = &mut *guard;
                state.indexes.ensure(specs, state.lobbies.values())
            }
            Err(e) => IndexReport {
                failed: specs
                    .iter()
                    .map(|spec| StoreError::IndexCreation {
                        index: spec.name.clone(),
                        reason: e.to_string(),
                    })
                    .collect(),
                ..IndexReport::default()
            },
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_index_failures(report.failed.len());
        }

        if report.is_complete() {
            info!(
                created = report.created.len(),
                existing = report.existing.len(),
                "Lobby indexes ready"
            );
        } else {
            for failure in &report.failed {
                warn!(error = %failure, "Lobby index could not be created");
            }
            warn!(
                created = report.created.len(),
                failed = report.failed.len(),
                "Some lobby indexes could not be created; queries fall back to scans"
            );
        }

        report
    }

    async fn create(&self, lobby: NewLobby) -> StoreResult<Lobby> {
        validate_new_lobby(&lobby)?;

        let now = current_timestamp();
        let lobby = lobby.into_lobby(generate_lobby_id(), now, self.default_expiry(now));

        let size = {
            let mut state = self.write()?;
            state.indexes.insert(&lobby);
            state.lobbies.insert(lobby.id, lobby.clone());
            state.lobbies.len()
        };
        self.record_size(size);

        debug!(
            lobby_id = %lobby.id,
            game_id = %lobby.game_id,
            region = %lobby.region,
            "Created lobby"
        );
        Ok(lobby)
    }

    async fn update(&self, mut lobby: Lobby) -> StoreResult<Lobby> {
        let mut state = self.write()?;
        let previous = state
            .lobbies
            .get(&lobby.id)
            .cloned()
            .ok_or(StoreError::NotFound { lobby_id: lobby.id })?;

        lobby.created_at = previous.created_at;
        // Never move backwards even if the clock does
        lobby.updated_at = current_timestamp().max(previous.updated_at);

        state.indexes.replace(&previous, &lobby);
        state.lobbies.insert(lobby.id, lobby.clone());

        debug!(lobby_id = %lobby.id, status = %lobby.status, "Updated lobby");
        Ok(lobby)
    }

    async fn delete(&self, id: LobbyId) -> StoreResult<bool> {
        let (removed, size) = {
            let mut state = self.write()?;
            let removed = state.remove(&id).is_some();
            (removed, state.lobbies.len())
        };

        if removed {
            self.record_size(size);
            debug!(lobby_id = %id, "Deleted lobby");
        }
        Ok(removed)
    }

    async fn get_by_id(&self, id: LobbyId) -> StoreResult<Option<Lobby>> {
        Ok(self.read()?.lobbies.get(&id).cloned())
    }

    async fn search(
        &self,
        filter: &LobbySearchFilter,
        pagination: Pagination,
    ) -> StoreResult<SearchPage<Lobby>> {
        let filter = filter.clone().normalized();
        let state = self.read()?;
        let candidates = state.candidates(state.indexes.search_candidates(&filter));
        Ok(search_lobbies(candidates, &filter, pagination))
    }

    async fn get_featured(
        &self,
        game_id: Option<&str>,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Lobby>> {
        let game_id = game_id.filter(|game_id| is_present(game_id));
        let limit = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.config.featured_limit as i64);
        let state = self.read()?;
        let candidates = state.candidates(state.indexes.featured_candidates(game_id));
        Ok(select_featured(candidates, game_id, Some(limit)))
    }

    async fn get_stats(&self, game_id: Option<&str>) -> StoreResult<LobbyStats> {
        let game_id = game_id.filter(|game_id| is_present(game_id));
        let state = self.read()?;
        let candidates = state.candidates(state.indexes.open_candidates(game_id));
        Ok(LobbyStats::compute(candidates, game_id, current_timestamp()))
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let (removed, size) = {
            let mut state = self.write()?;
            let expired = match state.indexes.expired(now) {
                Some(ids) => ids,
                None => state
                    .lobbies
                    .values()
                    .filter(|lobby| lobby.expires_at <= now)
                    .map(|lobby| lobby.id)
                    .collect(),
            };

            let removed = expired
                .iter()
                .filter(|id| state.remove(id).is_some())
                .count();
            (removed, state.lobbies.len())
        };

        if removed > 0 {
            self.record_size(size);
            if let Some(metrics) = &self.metrics {
                metrics.record_ttl_removals(removed);
            }
            info!(removed, remaining = size, "Removed expired lobbies");
        }
        Ok(removed)
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.read()?.lobbies.len())
    }
}
