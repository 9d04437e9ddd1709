//! Lobby search filters, pagination and ranking
//!
//! These functions are storage-agnostic: a repository narrows candidates
//! however it likes (indexes, scans) and then runs them through
//! [`search_lobbies`] or [`select_featured`] so every backend applies the same
//! visibility default, limits and ordering.

use crate::types::{GameId, Lobby, LobbyStatus, LobbyVisibility, PlayerId};
use crate::utils::{is_present, tokenize};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Page size used when the caller asks for none (or a non-positive one)
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page a caller can request
pub const MAX_PAGE_LIMIT: usize = 100;

/// Size of the featured listing when the caller does not specify one
pub const DEFAULT_FEATURED_LIMIT: usize = 8;

/// Filter set for lobby search. Unset (or blank) fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySearchFilter {
    pub game_id: Option<GameId>,
    pub game_mode: Option<String>,
    pub region: Option<String>,
    pub status: Option<LobbyStatus>,
    pub visibility: Option<LobbyVisibility>,
    #[serde(rename = "type")]
    pub lobby_type: Option<String>,
    pub creator_id: Option<PlayerId>,
    pub player_id: Option<PlayerId>,
    pub is_featured: Option<bool>,
    /// Free-text query; matches when any of its words appears in the lobby's
    /// name, description or tags
    pub text: Option<String>,
    pub min_players: Option<usize>,
    pub max_players: Option<usize>,
}

impl LobbySearchFilter {
    pub fn for_game(game_id: impl Into<GameId>) -> Self {
        Self {
            game_id: Some(game_id.into()),
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_game_mode(mut self, game_mode: impl Into<String>) -> Self {
        self.game_mode = Some(game_mode.into());
        self
    }

    pub fn with_featured(mut self, is_featured: bool) -> Self {
        self.is_featured = Some(is_featured);
        self
    }

    pub fn with_status(mut self, status: LobbyStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_visibility(mut self, visibility: LobbyVisibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_creator(mut self, creator_id: impl Into<PlayerId>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    pub fn with_player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Drop blank string constraints so `Some("")` behaves like `None`
    pub fn normalized(mut self) -> Self {
        fn keep_present(value: &mut Option<String>) {
            if value.as_deref().is_some_and(|v| !is_present(v)) {
                *value = None;
            }
        }

        keep_present(&mut self.game_id);
        keep_present(&mut self.game_mode);
        keep_present(&mut self.region);
        keep_present(&mut self.lobby_type);
        keep_present(&mut self.creator_id);
        keep_present(&mut self.player_id);
        if self.text.as_deref().is_some_and(|t| tokenize(t).next().is_none()) {
            self.text = None;
        }
        self
    }

    /// Private lobbies are only visible to callers scoping to their own
    /// lobbies or asking for a visibility explicitly
    pub fn includes_private(&self) -> bool {
        self.creator_id.is_some() || self.player_id.is_some() || self.visibility.is_some()
    }

    /// Lowercase tokens of the text query
    pub fn text_tokens(&self) -> BTreeSet<String> {
        self.text
            .as_deref()
            .map(|text| tokenize(text).collect())
            .unwrap_or_default()
    }

    /// Full predicate, including the private-visibility default
    pub fn matches(&self, lobby: &Lobby) -> bool {
        if let Some(visibility) = self.visibility {
            if lobby.visibility != visibility {
                return false;
            }
        } else if !self.includes_private() && lobby.visibility == LobbyVisibility::Private {
            return false;
        }

        let equal = |wanted: &Option<String>, actual: &str| {
            wanted.as_deref().map_or(true, |wanted| wanted == actual)
        };

        if !equal(&self.game_id, &lobby.game_id)
            || !equal(&self.game_mode, &lobby.game_mode)
            || !equal(&self.region, &lobby.region)
            || !equal(&self.lobby_type, &lobby.lobby_type)
            || !equal(&self.creator_id, &lobby.creator_id)
        {
            return false;
        }

        if self.status.is_some_and(|status| status != lobby.status) {
            return false;
        }
        if self.is_featured.is_some_and(|featured| featured != lobby.is_featured) {
            return false;
        }
        if let Some(player_id) = &self.player_id {
            if !lobby.contains_player(player_id) {
                return false;
            }
        }

        let filled = lobby.filled_slots();
        if self.min_players.is_some_and(|min| filled < min) {
            return false;
        }
        if self.max_players.is_some_and(|max| filled > max) {
            return false;
        }

        let query = self.text_tokens();
        if !query.is_empty() {
            let tokens = lobby_text_tokens(lobby);
            if query.is_disjoint(&tokens) {
                return false;
            }
        }

        true
    }
}

/// Tokens indexed for free-text search
pub fn lobby_text_tokens(lobby: &Lobby) -> BTreeSet<String> {
    tokenize(&lobby.name)
        .chain(tokenize(&lobby.description))
        .chain(lobby.tags.iter().flat_map(|tag| tokenize(tag)))
        .collect()
}

/// Offset/limit pagination as requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub skip: u64,
    /// Requested page size; absent or non-positive means the default
    pub limit: Option<i64>,
}

impl Pagination {
    pub fn new(skip: u64, limit: i64) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }

    /// Limit after applying the default and the maximum
    pub fn effective_limit(&self) -> usize {
        normalize_limit(self.limit, DEFAULT_PAGE_LIMIT)
    }
}

/// Clamp a requested limit to `1..=MAX_PAGE_LIMIT`, using `default` when
/// absent or non-positive
pub fn normalize_limit(requested: Option<i64>, default: usize) -> usize {
    match requested {
        Some(limit) if limit > 0 => (limit as u64).min(MAX_PAGE_LIMIT as u64) as usize,
        _ => default.min(MAX_PAGE_LIMIT),
    }
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub skip: u64,
    pub limit: usize,
}

impl<T> SearchPage<T> {
    pub fn empty(pagination: Pagination) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            skip: pagination.skip,
            limit: pagination.effective_limit(),
        }
    }
}

/// Search ranking: featured first, then newest, then id for a stable order
pub fn rank_order(a: &Lobby, b: &Lobby) -> Ordering {
    b.is_featured
        .cmp(&a.is_featured)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Featured ranking: featured first, then fuller lobbies, then newest
pub fn featured_order(a: &Lobby, b: &Lobby) -> Ordering {
    b.is_featured
        .cmp(&a.is_featured)
        .then_with(|| b.filled_slots().cmp(&a.filled_slots()))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Whether a lobby may appear on the featured listing
pub fn is_featured_candidate(lobby: &Lobby, game_id: Option<&str>) -> bool {
    lobby.status == LobbyStatus::Open
        && matches!(
            lobby.visibility,
            LobbyVisibility::Public | LobbyVisibility::Matchmaking
        )
        && game_id.map_or(true, |game_id| lobby.game_id == game_id)
}

/// Filter, rank and paginate a candidate set
pub fn search_lobbies<'a, I>(
    candidates: I,
    filter: &LobbySearchFilter,
    pagination: Pagination,
) -> SearchPage<Lobby>
where
    I: IntoIterator<Item = &'a Lobby>,
{
    let filter = filter.clone().normalized();
    let mut matched: Vec<&Lobby> = candidates
        .into_iter()
        .filter(|lobby| filter.matches(lobby))
        .collect();
    matched.sort_by(|a, b| rank_order(a, b));

    let limit = pagination.effective_limit();
    let skip = usize::try_from(pagination.skip).unwrap_or(usize::MAX);
    let items = matched
        .iter()
        .skip(skip)
        .take(limit)
        .map(|lobby| (*lobby).clone())
        .collect();

    SearchPage {
        items,
        total: matched.len() as u64,
        skip: pagination.skip,
        limit,
    }
}

/// Pick the featured listing from a candidate set
pub fn select_featured<'a, I>(candidates: I, game_id: Option<&str>, limit: Option<i64>) -> Vec<Lobby>
where
    I: IntoIterator<Item = &'a Lobby>,
{
    let game_id = game_id.filter(|game_id| is_present(game_id));
    let mut featured: Vec<&Lobby> = candidates
        .into_iter()
        .filter(|lobby| is_featured_candidate(lobby, game_id))
        .collect();
    featured.sort_by(|a, b| featured_order(a, b));

    featured
        .into_iter()
        .take(normalize_limit(limit, DEFAULT_FEATURED_LIMIT))
        .cloned()
        .collect()
}
