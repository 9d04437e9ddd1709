//! Game rules provider traits and implementations
//!
//! Game definitions live in a separate reference-data service. Lobby creation
//! only needs a few facts per game (seat count, default mode, lobby lifetime),
//! which this module provides.

use crate::error::{LobbyHubError, Result};
use crate::types::GameId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound on player slots in a single lobby
pub const MAX_SLOT_COUNT: usize = 64;

/// Lobby-relevant rules of one game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRules {
    /// Number of player slots in a new lobby
    pub slot_count: usize,
    /// Mode assigned to lobbies created by matchmaking
    pub default_mode: String,
    /// Lifetime of a matchmaking lobby before the TTL monitor removes it
    pub lobby_ttl_seconds: u64,
}

impl GameRules {
    pub fn new(slot_count: usize, default_mode: impl Into<String>, lobby_ttl: Duration) -> Self {
        Self {
            slot_count,
            default_mode: default_mode.into(),
            lobby_ttl_seconds: lobby_ttl.as_secs(),
        }
    }

    pub fn lobby_ttl(&self) -> Duration {
        Duration::from_secs(self.lobby_ttl_seconds)
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            slot_count: 4,
            default_mode: "default".to_string(),
            lobby_ttl_seconds: 1800,
        }
    }
}

/// Trait for looking up the rules of a game
pub trait GameRulesProvider: Send + Sync {
    /// Rules for a game; unknown games get the provider's defaults
    fn rules_for(&self, game_id: &str) -> GameRules;

    /// Check a rule set before it is used
    fn validate_rules(&self, rules: &GameRules) -> Result<()> {
        if rules.slot_count == 0 {
            return Err(LobbyHubError::ConfigurationError {
                message: "Lobby slot count must be greater than 0".to_string(),
            }
            .into());
        }

        if rules.slot_count > MAX_SLOT_COUNT {
            return Err(LobbyHubError::ConfigurationError {
                message: format!("Lobby slot count cannot exceed {}", MAX_SLOT_COUNT),
            }
            .into());
        }

        if rules.default_mode.trim().is_empty() {
            return Err(LobbyHubError::ConfigurationError {
                message: "Default game mode cannot be empty".to_string(),
            }
            .into());
        }

        if rules.lobby_ttl_seconds == 0 {
            return Err(LobbyHubError::ConfigurationError {
                message: "Lobby TTL must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Fixed rule table with per-game overrides
#[derive(Debug, Clone, Default)]
pub struct StaticGameRulesProvider {
    defaults: GameRules,
    overrides: HashMap<GameId, GameRules>,
}

impl StaticGameRulesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom default rules
    pub fn with_defaults(defaults: GameRules) -> Result<Self> {
        let provider = Self {
            defaults,
            overrides: HashMap::new(),
        };
        provider.validate_rules(&provider.defaults)?;
        Ok(provider)
    }

    /// Register rules for one game
    pub fn set_rules(&mut self, game_id: impl Into<GameId>, rules: GameRules) -> Result<()> {
        self.validate_rules(&rules)?;
        self.overrides.insert(game_id.into(), rules);
        Ok(())
    }

    pub fn defaults(&self) -> &GameRules {
        &self.defaults
    }
}

impl GameRulesProvider for StaticGameRulesProvider {
    fn rules_for(&self, game_id: &str) -> GameRules {
        self.overrides
            .get(game_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}
