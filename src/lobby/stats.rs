//! Aggregate statistics over the live lobby set

use crate::types::{Lobby, LobbyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of open-lobby activity, recomputed on every request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStats {
    pub total_active_lobbies: u64,
    pub total_players_waiting: u64,
    pub lobbies_by_game: BTreeMap<String, u64>,
    pub lobbies_by_region: BTreeMap<String, u64>,
    pub lobbies_by_mode: BTreeMap<String, u64>,
    /// Mean age of the counted lobbies
    pub average_fill_time_seconds: f64,
    /// Mean filled/capacity ratio over counted lobbies that have slots
    pub average_occupancy: f64,
}

impl LobbyStats {
    /// Compute statistics over the Open lobbies, optionally limited to one game
    pub fn compute<'a, I>(lobbies: I, game_id: Option<&str>, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Lobby>,
    {
        let mut stats = Self::default();
        let mut total_age_seconds = 0.0;
        let mut occupancy_sum = 0.0;
        let mut lobbies_with_slots = 0u64;

        let counted = lobbies.into_iter().filter(|lobby| {
            lobby.status == LobbyStatus::Open
                && game_id.map_or(true, |game_id| lobby.game_id == game_id)
        });

        for lobby in counted {
            stats.total_active_lobbies += 1;
            stats.total_players_waiting += lobby.filled_slots() as u64;

            *stats.lobbies_by_game.entry(lobby.game_id.clone()).or_default() += 1;
            *stats.lobbies_by_region.entry(lobby.region.clone()).or_default() += 1;
            *stats.lobbies_by_mode.entry(lobby.game_mode.clone()).or_default() += 1;

            // Clock skew can put created_at slightly in the future
            let age = (now - lobby.created_at).num_milliseconds().max(0);
            total_age_seconds += age as f64 / 1000.0;

            if lobby.capacity() > 0 {
                occupancy_sum += lobby.occupancy();
                lobbies_with_slots += 1;
            }
        }

        if stats.total_active_lobbies > 0 {
            stats.average_fill_time_seconds = total_age_seconds / stats.total_active_lobbies as f64;
        }
        if lobbies_with_slots > 0 {
            stats.average_occupancy = occupancy_sum / lobbies_with_slots as f64;
        }

        stats
    }

    pub fn is_empty(&self) -> bool {
        self.total_active_lobbies == 0
    }
}
