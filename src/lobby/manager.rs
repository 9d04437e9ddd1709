//! Lobby manager: the domain handler behind the command consumer
//!
//! Seats queued players into open matchmaking lobbies for their game and
//! region, creating a lobby when none has room. There is no skill matching;
//! the oldest lobby with a free seat wins.

use crate::amqp::handlers::CommandHandler;
use crate::amqp::messages::{EventEnvelope, PlayerQueuedPayload};
use crate::error::Result;
use crate::lobby::provider::GameRulesProvider;
use crate::lobby::repository::LobbyRepository;
use crate::lobby::search::{LobbySearchFilter, Pagination, MAX_PAGE_LIMIT};
use crate::metrics::MetricsCollector;
use crate::types::{Lobby, LobbyStatus, LobbyVisibility, NewLobby};
use crate::utils::{current_timestamp, is_present};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lobby type label of lobbies created by matchmaking
pub const MATCHMAKING_LOBBY_TYPE: &str = "matchmaking";

/// Statistics about lobby manager operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyManagerStats {
    /// Queue commands handled, including duplicates
    pub players_queued: u64,
    /// Players seated in an existing lobby
    pub players_seated: u64,
    /// Lobbies created for a queued player
    pub lobbies_created: u64,
    /// Lobbies whose last slot was filled
    pub lobbies_filled: u64,
    /// Redelivered commands for players already seated
    pub duplicates_ignored: u64,
    /// Commands without a usable game or region
    pub commands_dropped: u64,
}

/// What a queue command did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    AlreadySeated,
    Seated,
    Created,
    Dropped,
}

impl QueueOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            QueueOutcome::AlreadySeated => "already_seated",
            QueueOutcome::Seated => "seated",
            QueueOutcome::Created => "created",
            QueueOutcome::Dropped => "dropped",
        }
    }
}

/// The main lobby manager
#[derive(Clone)]
pub struct LobbyManager {
    repository: Arc<dyn LobbyRepository>,
    rules: Arc<dyn GameRulesProvider>,
    /// Serializes seat assignment within this process
    queue_lock: Arc<Mutex<()>>,
    stats: Arc<RwLock<LobbyManagerStats>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LobbyManager {
    pub fn new(repository: Arc<dyn LobbyRepository>, rules: Arc<dyn GameRulesProvider>) -> Self {
        Self {
            repository,
            rules,
            queue_lock: Arc::new(Mutex::new(())),
            stats: Arc::new(RwLock::new(LobbyManagerStats::default())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get current manager statistics
    pub fn get_stats(&self) -> LobbyManagerStats {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Seat a player, creating a lobby when needed
    pub async fn queue_player(&self, payload: &PlayerQueuedPayload) -> Result<QueueOutcome> {
        if !is_present(&payload.game_id) || !is_present(&payload.region) {
            warn!(
                player_id = %payload.player_id,
                game_id = %payload.game_id,
                region = %payload.region,
                "Queue command without game or region, dropping"
            );
            return Ok(self.finish(QueueOutcome::Dropped, false));
        }

        let _guard = self.queue_lock.lock().await;

        if let Some(lobby) = self.current_lobby(payload).await? {
            debug!(
                player_id = %payload.player_id,
                lobby_id = %lobby.id,
                "Player already seated, ignoring duplicate queue command"
            );
            return Ok(self.finish(QueueOutcome::AlreadySeated, false));
        }

        match self.oldest_open_lobby(payload).await? {
            Some(mut lobby) => {
                lobby.seat_player(&payload.player_id);
                let filled = !lobby.has_free_slot();
                if filled {
                    lobby.status = LobbyStatus::Full;
                }
                let lobby = self.repository.update(lobby).await?;

                info!(
                    player_id = %payload.player_id,
                    lobby_id = %lobby.id,
                    filled_slots = lobby.filled_slots(),
                    capacity = lobby.capacity(),
                    "Seated player in existing lobby"
                );
                Ok(self.finish(QueueOutcome::Seated, filled))
            }
            None => {
                let rules = self.rules.rules_for(&payload.game_id);
                let expires_at = chrono::Duration::from_std(rules.lobby_ttl())
                    .ok()
                    .and_then(|ttl| current_timestamp().checked_add_signed(ttl));

                let mut new_lobby = NewLobby::open(
                    payload.game_id.clone(),
                    payload.region.clone(),
                    payload.player_id.clone(),
                    rules.slot_count.max(1),
                )
                .with_visibility(LobbyVisibility::Matchmaking)
                .with_game_mode(rules.default_mode)
                .with_players(&[payload.player_id.as_str()]);
                new_lobby.lobby_type = MATCHMAKING_LOBBY_TYPE.to_string();
                new_lobby.expires_at = expires_at;

                let filled = new_lobby.player_slots.iter().all(|slot| slot.is_filled());
                if filled {
                    new_lobby.status = LobbyStatus::Full;
                }

                let lobby = self.repository.create(new_lobby).await?;
                info!(
                    player_id = %payload.player_id,
                    lobby_id = %lobby.id,
                    game_id = %lobby.game_id,
                    region = %lobby.region,
                    capacity = lobby.capacity(),
                    "Created matchmaking lobby"
                );
                Ok(self.finish(QueueOutcome::Created, filled))
            }
        }
    }

    /// The live matchmaking lobby already holding this player, if any
    async fn current_lobby(&self, payload: &PlayerQueuedPayload) -> Result<Option<Lobby>> {
        let mut filter = LobbySearchFilter::for_game(payload.game_id.clone())
            .with_region(payload.region.clone())
            .with_player(payload.player_id.clone())
            .with_visibility(LobbyVisibility::Matchmaking);
        filter.lobby_type = Some(MATCHMAKING_LOBBY_TYPE.to_string());

        let page = self
            .repository
            .search(&filter, Pagination::new(0, MAX_PAGE_LIMIT as i64))
            .await?;

        Ok(page.items.into_iter().find(|lobby| {
            matches!(
                lobby.status,
                LobbyStatus::Open | LobbyStatus::Locked | LobbyStatus::Full
            )
        }))
    }

    /// Oldest open matchmaking lobby for the game and region with a free slot
    async fn oldest_open_lobby(&self, payload: &PlayerQueuedPayload) -> Result<Option<Lobby>> {
        let mut filter = LobbySearchFilter::for_game(payload.game_id.clone())
            .with_region(payload.region.clone())
            .with_status(LobbyStatus::Open)
            .with_visibility(LobbyVisibility::Matchmaking);
        filter.lobby_type = Some(MATCHMAKING_LOBBY_TYPE.to_string());

        let mut oldest: Option<Lobby> = None;
        let mut skip = 0u64;
        loop {
            let page = self
                .repository
                .search(&filter, Pagination::new(skip, MAX_PAGE_LIMIT as i64))
                .await?;
            let fetched = page.items.len() as u64;

            for lobby in page.items.into_iter().filter(Lobby::has_free_slot) {
                let older = oldest.as_ref().map_or(true, |current| {
                    (lobby.created_at, lobby.id) < (current.created_at, current.id)
                });
                if older {
                    oldest = Some(lobby);
                }
            }

            skip += fetched;
            if fetched == 0 || skip >= page.total {
                break;
            }
        }

        Ok(oldest)
    }

    fn finish(&self, outcome: QueueOutcome, filled: bool) -> QueueOutcome {
        if let Ok(mut stats) = self.stats.write() {
            stats.players_queued += 1;
            match outcome {
                QueueOutcome::AlreadySeated => stats.duplicates_ignored += 1,
                QueueOutcome::Seated => stats.players_seated += 1,
                QueueOutcome::Created => stats.lobbies_created += 1,
                QueueOutcome::Dropped => stats.commands_dropped += 1,
            }
            if filled {
                stats.lobbies_filled += 1;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_queue_outcome(outcome.label());
        }

        outcome
    }
}

#[async_trait]
impl CommandHandler for LobbyManager {
    async fn handle_player_queued(
        &self,
        envelope: &EventEnvelope,
        payload: &PlayerQueuedPayload,
    ) -> Result<()> {
        let outcome = self.queue_player(payload).await?;
        debug!(
            event_id = %envelope.id,
            player_id = %payload.player_id,
            outcome = outcome.label(),
            "Handled PlayerQueued"
        );
        Ok(())
    }
}
