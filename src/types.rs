//! Common types used throughout the lobby service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for lobbies
pub type LobbyId = Uuid;

/// Identifier of a game definition (owned by the reference-data service)
pub type GameId = String;

/// Lifecycle status of a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LobbyStatus {
    Open,
    Locked,
    Full,
    Expired,
    Cancelled,
}

impl std::fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LobbyStatus::Open => write!(f, "Open"),
            LobbyStatus::Locked => write!(f, "Locked"),
            LobbyStatus::Full => write!(f, "Full"),
            LobbyStatus::Expired => write!(f, "Expired"),
            LobbyStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Who can discover a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LobbyVisibility {
    Public,
    Private,
    Matchmaking,
}

impl std::fmt::Display for LobbyVisibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LobbyVisibility::Public => write!(f, "Public"),
            LobbyVisibility::Private => write!(f, "Private"),
            LobbyVisibility::Matchmaking => write!(f, "Matchmaking"),
        }
    }
}

/// Ready state of a seated player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReadyState {
    #[default]
    NotReady,
    Ready,
}

/// A seat in a lobby. An empty seat has no player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSlot {
    pub player_id: Option<PlayerId>,
    pub ready_state: ReadyState,
}

impl PlayerSlot {
    /// Create an empty slot
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a slot occupied by a player who is not ready yet
    pub fn occupied(player_id: impl Into<PlayerId>) -> Self {
        Self {
            player_id: Some(player_id.into()),
            ready_state: ReadyState::NotReady,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.player_id.is_some()
    }
}

/// Lobby aggregate as persisted by the lobby store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    pub id: LobbyId,
    pub game_id: GameId,
    pub game_mode: String,
    pub region: String,
    pub status: LobbyStatus,
    pub visibility: LobbyVisibility,
    #[serde(rename = "type")]
    pub lobby_type: String,
    pub creator_id: PlayerId,
    pub name: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub player_slots: Vec<PlayerSlot>,
    pub is_featured: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lobby {
    /// Number of slots holding a player
    pub fn filled_slots(&self) -> usize {
        self.player_slots.iter().filter(|slot| slot.is_filled()).count()
    }

    /// Total number of slots, filled or not
    pub fn capacity(&self) -> usize {
        self.player_slots.len()
    }

    pub fn has_free_slot(&self) -> bool {
        self.filled_slots() < self.capacity()
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.player_slots
            .iter()
            .any(|slot| slot.player_id.as_deref() == Some(player_id))
    }

    /// Seat a player in the first empty slot. Returns false when the lobby is full.
    pub fn seat_player(&mut self, player_id: &str) -> bool {
        match self.player_slots.iter_mut().find(|slot| !slot.is_filled()) {
            Some(slot) => {
                *slot = PlayerSlot::occupied(player_id);
                true
            }
            None => false,
        }
    }

    /// Fraction of slots filled, 0.0 for a lobby without slots
    pub fn occupancy(&self) -> f64 {
        if self.player_slots.is_empty() {
            return 0.0;
        }
        self.filled_slots() as f64 / self.capacity() as f64
    }
}

/// Caller-supplied part of a lobby; the store assigns id and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLobby {
    pub game_id: GameId,
    pub game_mode: String,
    pub region: String,
    pub status: LobbyStatus,
    pub visibility: LobbyVisibility,
    #[serde(rename = "type")]
    pub lobby_type: String,
    pub creator_id: PlayerId,
    pub name: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub player_slots: Vec<PlayerSlot>,
    pub is_featured: bool,
    /// Falls back to the store's default lobby TTL when absent
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewLobby {
    /// Open public lobby with `capacity` empty slots
    pub fn open(
        game_id: impl Into<GameId>,
        region: impl Into<String>,
        creator_id: impl Into<PlayerId>,
        capacity: usize,
    ) -> Self {
        Self {
            game_id: game_id.into(),
            game_mode: "default".to_string(),
            region: region.into(),
            status: LobbyStatus::Open,
            visibility: LobbyVisibility::Public,
            lobby_type: "custom".to_string(),
            creator_id: creator_id.into(),
            name: String::new(),
            description: String::new(),
            tags: BTreeSet::new(),
            player_slots: vec![PlayerSlot::empty(); capacity],
            is_featured: false,
            expires_at: None,
        }
    }

    pub fn with_visibility(mut self, visibility: LobbyVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_game_mode(mut self, game_mode: impl Into<String>) -> Self {
        self.game_mode = game_mode.into();
        self
    }

    pub fn with_status(mut self, status: LobbyStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn featured(mut self) -> Self {
        self.is_featured = true;
        self
    }

    /// Seat the given players in the leading slots
    pub fn with_players(mut self, players: &[&str]) -> Self {
        for (slot, player) in self.player_slots.iter_mut().zip(players) {
            *slot = PlayerSlot::occupied(*player);
        }
        self
    }

    /// Build the persisted aggregate
    pub fn into_lobby(
        self,
        id: LobbyId,
        now: DateTime<Utc>,
        default_expiry: DateTime<Utc>,
    ) -> Lobby {
        Lobby {
            id,
            game_id: self.game_id,
            game_mode: self.game_mode,
            region: self.region,
            status: self.status,
            visibility: self.visibility,
            lobby_type: self.lobby_type,
            creator_id: self.creator_id,
            name: self.name,
            description: self.description,
            tags: self.tags,
            player_slots: self.player_slots,
            is_featured: self.is_featured,
            expires_at: self.expires_at.unwrap_or(default_expiry),
            created_at: now,
            updated_at: now,
        }
    }
}
