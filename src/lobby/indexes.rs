//! Secondary indexes for the lobby store
//!
//! Indexes only narrow the candidate set for a query. Callers always apply
//! the full filter predicate afterwards, so a query answers the same with or
//! without any index in place.

use crate::error::{StoreError, StoreResult};
use crate::lobby::search::LobbySearchFilter;
use crate::types::{Lobby, LobbyId, LobbyStatus, LobbyVisibility};
use crate::utils::tokenize;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lobby fields an index can be declared over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LobbyField {
    Status,
    CreatedAt,
    GameId,
    Region,
    Visibility,
    IsFeatured,
    CreatorId,
    PlayerSlots,
    ExpiresAt,
    Name,
    Description,
    Tags,
}

impl LobbyField {
    /// Single-valued fields usable in a compound key
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            LobbyField::PlayerSlots | LobbyField::Name | LobbyField::Description | LobbyField::Tags
        )
    }

    pub fn is_text(self) -> bool {
        matches!(
            self,
            LobbyField::Name | LobbyField::Description | LobbyField::Tags
        )
    }
}

impl std::fmt::Display for LobbyField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LobbyField::Status => "status",
            LobbyField::CreatedAt => "createdAt",
            LobbyField::GameId => "gameId",
            LobbyField::Region => "region",
            LobbyField::Visibility => "visibility",
            LobbyField::IsFeatured => "isFeatured",
            LobbyField::CreatorId => "creatorId",
            LobbyField::PlayerSlots => "playerSlots.playerId",
            LobbyField::ExpiresAt => "expiresAt",
            LobbyField::Name => "name",
            LobbyField::Description => "description",
            LobbyField::Tags => "tags",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Ordered index over a tuple of scalar fields
    Compound,
    /// One entry per seated player
    Multikey,
    /// Expiry queue on a timestamp field
    Ttl,
    /// Token index over text fields
    Text,
}

/// Declarative index definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<LobbyField>,
}

impl IndexSpec {
    pub fn compound(name: impl Into<String>, fields: &[LobbyField]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Compound,
            fields: fields.to_vec(),
        }
    }

    pub fn multikey(name: impl Into<String>, field: LobbyField) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Multikey,
            fields: vec![field],
        }
    }

    pub fn ttl(name: impl Into<String>, field: LobbyField) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Ttl,
            fields: vec![field],
        }
    }

    pub fn text(name: impl Into<String>, fields: &[LobbyField]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Text,
            fields: fields.to_vec(),
        }
    }

    /// Check the definition is buildable on its own
    pub fn validate(&self) -> StoreResult<()> {
        let fail = |reason: &str| StoreError::IndexCreation {
            index: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(fail("index name is empty"));
        }
        if self.fields.is_empty() {
            return Err(fail("index has no key fields"));
        }
        let unique: HashSet<_> = self.fields.iter().collect();
        if unique.len() != self.fields.len() {
            return Err(fail("index repeats a key field"));
        }

        match self.kind {
            IndexKind::Compound => {
                if let Some(field) = self.fields.iter().find(|field| !field.is_scalar()) {
                    return Err(fail(&format!("field {} cannot be part of a compound key", field)));
                }
            }
            IndexKind::Multikey => {
                if self.fields != [LobbyField::PlayerSlots] {
                    return Err(fail("multikey index must cover playerSlots.playerId only"));
                }
            }
            IndexKind::Ttl => {
                if self.fields != [LobbyField::ExpiresAt] {
                    return Err(fail("ttl index must cover expiresAt only"));
                }
            }
            IndexKind::Text => {
                if let Some(field) = self.fields.iter().find(|field| !field.is_text()) {
                    return Err(fail(&format!("field {} is not a text field", field)));
                }
            }
        }

        Ok(())
    }
}

/// The index policy of the lobby collection
pub fn lobby_indexes() -> Vec<IndexSpec> {
    use LobbyField::*;

    vec![
        IndexSpec::compound("status_created", &[Status, CreatedAt]),
        IndexSpec::compound("game_region_status", &[GameId, Region, Status]),
        IndexSpec::compound("visibility_featured_status", &[Visibility, IsFeatured, Status]),
        IndexSpec::compound("creator_status", &[CreatorId, Status]),
        IndexSpec::multikey("player_slots", PlayerSlots),
        IndexSpec::ttl("expires_at_ttl", ExpiresAt),
        IndexSpec::text("lobby_text", &[Name, Description, Tags]),
    ]
}

/// Outcome of applying a set of index definitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    pub failed: Vec<StoreError>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One component of a compound key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Flag(bool),
    Instant(DateTime<Utc>),
    Text(String),
}

impl From<LobbyStatus> for KeyPart {
    fn from(status: LobbyStatus) -> Self {
        KeyPart::Text(status.to_string())
    }
}

impl From<LobbyVisibility> for KeyPart {
    fn from(visibility: LobbyVisibility) -> Self {
        KeyPart::Text(visibility.to_string())
    }
}

fn key_part(lobby: &Lobby, field: LobbyField) -> Option<KeyPart> {
    let part: KeyPart = match field {
        LobbyField::Status => lobby.status.into(),
        LobbyField::CreatedAt => KeyPart::Instant(lobby.created_at),
        LobbyField::GameId => KeyPart::Text(lobby.game_id.clone()),
        LobbyField::Region => KeyPart::Text(lobby.region.clone()),
        LobbyField::Visibility => lobby.visibility.into(),
        LobbyField::IsFeatured => KeyPart::Flag(lobby.is_featured),
        LobbyField::CreatorId => KeyPart::Text(lobby.creator_id.clone()),
        LobbyField::ExpiresAt => KeyPart::Instant(lobby.expires_at),
        LobbyField::PlayerSlots | LobbyField::Name | LobbyField::Description | LobbyField::Tags => {
            return None
        }
    };
    Some(part)
}

/// Equality constraints per field; several values for a field are alternatives
pub type FieldConstraints = BTreeMap<LobbyField, Vec<KeyPart>>;

/// Ordered compound index supporting equality-prefix lookups
#[derive(Debug, Clone)]
pub struct CompoundIndex {
    fields: Vec<LobbyField>,
    entries: BTreeSet<(Vec<KeyPart>, LobbyId)>,
}

impl CompoundIndex {
    fn new(fields: Vec<LobbyField>) -> Self {
        Self {
            fields,
            entries: BTreeSet::new(),
        }
    }

    fn key(&self, lobby: &Lobby) -> Vec<KeyPart> {
        self.fields
            .iter()
            .filter_map(|field| key_part(lobby, *field))
            .collect()
    }

    fn insert(&mut self, lobby: &Lobby) {
        self.entries.insert((self.key(lobby), lobby.id));
    }

    fn remove(&mut self, lobby: &Lobby) {
        self.entries.remove(&(self.key(lobby), lobby.id));
    }

    /// Number of leading key fields the constraints pin down
    fn usable_prefix(&self, constraints: &FieldConstraints) -> usize {
        self.fields
            .iter()
            .take_while(|field| constraints.contains_key(field))
            .count()
    }

    /// Ids whose key starts with `prefix`, in key order
    pub fn prefix_lookup<'a>(
        &'a self,
        prefix: &'a [KeyPart],
    ) -> impl Iterator<Item = LobbyId> + 'a {
        let start = (prefix.to_vec(), Uuid::nil());
        self.entries
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, id)| *id)
    }

    fn lookup(&self, constraints: &FieldConstraints, prefix_len: usize) -> HashSet<LobbyId> {
        let mut prefixes: Vec<Vec<KeyPart>> = vec![Vec::new()];
        for field in &self.fields[..prefix_len] {
            let values = constraints.get(field).map(Vec::as_slice).unwrap_or_default();
            prefixes = prefixes
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push(value.clone());
                        next
                    })
                })
                .collect();
        }

        prefixes
            .iter()
            .flat_map(|prefix| self.prefix_lookup(prefix))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Value to lobby ids, for fields holding many values per lobby
#[derive(Debug, Clone, Default)]
pub struct MultikeyIndex {
    entries: HashMap<String, HashSet<LobbyId>>,
}

impl MultikeyIndex {
    fn insert_values<I: IntoIterator<Item = String>>(&mut self, id: LobbyId, values: I) {
        for value in values {
            self.entries.entry(value).or_default().insert(id);
        }
    }

    fn remove_values<I: IntoIterator<Item = String>>(&mut self, id: LobbyId, values: I) {
        for value in values {
            if let Some(ids) = self.entries.get_mut(&value) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(&value);
                }
            }
        }
    }

    pub fn get(&self, value: &str) -> HashSet<LobbyId> {
        self.entries.get(value).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn seated_players(lobby: &Lobby) -> impl Iterator<Item = String> + '_ {
    lobby
        .player_slots
        .iter()
        .filter_map(|slot| slot.player_id.clone())
}

/// Token index over a fixed set of text fields
#[derive(Debug, Clone)]
pub struct TextIndex {
    fields: Vec<LobbyField>,
    tokens: MultikeyIndex,
}

impl TextIndex {
    fn new(fields: Vec<LobbyField>) -> Self {
        Self {
            fields,
            tokens: MultikeyIndex::default(),
        }
    }

    fn tokens_of(&self, lobby: &Lobby) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        for field in &self.fields {
            match field {
                LobbyField::Name => tokens.extend(tokenize(&lobby.name)),
                LobbyField::Description => tokens.extend(tokenize(&lobby.description)),
                LobbyField::Tags => {
                    tokens.extend(lobby.tags.iter().flat_map(|tag| tokenize(tag)))
                }
                _ => {}
            }
        }
        tokens
    }

    /// Text queries match on name, description and tags; a narrower index
    /// would drop matches, so the planner only uses one covering all three
    fn covers_search_fields(&self) -> bool {
        [LobbyField::Name, LobbyField::Description, LobbyField::Tags]
            .iter()
            .all(|field| self.fields.contains(field))
    }

    /// Ids matching any of the tokens
    pub fn any_token(&self, tokens: &BTreeSet<String>) -> HashSet<LobbyId> {
        tokens
            .iter()
            .flat_map(|token| self.tokens.get(token))
            .collect()
    }
}

/// Expiry queue ordered by deadline
#[derive(Debug, Clone, Default)]
pub struct TtlIndex {
    queue: BTreeSet<(DateTime<Utc>, LobbyId)>,
}

impl TtlIndex {
    /// Ids whose deadline is at or before `now`, earliest first
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<LobbyId> {
        self.queue
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.iter().next().map(|(expires_at, _)| *expires_at)
    }
}

#[derive(Debug, Clone)]
enum BuiltIndex {
    Compound(CompoundIndex),
    Multikey(MultikeyIndex),
    Ttl(TtlIndex),
    Text(TextIndex),
}

impl BuiltIndex {
    fn empty(spec: &IndexSpec) -> Self {
        match spec.kind {
            IndexKind::Compound => BuiltIndex::Compound(CompoundIndex::new(spec.fields.clone())),
            IndexKind::Multikey => BuiltIndex::Multikey(MultikeyIndex::default()),
            IndexKind::Ttl => BuiltIndex::Ttl(TtlIndex::default()),
            IndexKind::Text => BuiltIndex::Text(TextIndex::new(spec.fields.clone())),
        }
    }

    fn insert(&mut self, lobby: &Lobby) {
        match self {
            BuiltIndex::Compound(index) => index.insert(lobby),
            BuiltIndex::Multikey(index) => index.insert_values(lobby.id, seated_players(lobby)),
            BuiltIndex::Ttl(index) => {
                index.queue.insert((lobby.expires_at, lobby.id));
            }
            BuiltIndex::Text(index) => {
                let tokens = index.tokens_of(lobby);
                index.tokens.insert_values(lobby.id, tokens);
            }
        }
    }

    fn remove(&mut self, lobby: &Lobby) {
        match self {
            BuiltIndex::Compound(index) => index.remove(lobby),
            BuiltIndex::Multikey(index) => index.remove_values(lobby.id, seated_players(lobby)),
            BuiltIndex::Ttl(index) => {
                index.queue.remove(&(lobby.expires_at, lobby.id));
            }
            BuiltIndex::Text(index) => {
                let tokens = index.tokens_of(lobby);
                index.tokens.remove_values(lobby.id, tokens);
            }
        }
    }
}

/// All indexes built over one lobby collection
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    specs: Vec<IndexSpec>,
    built: Vec<BuiltIndex>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build any missing index from `specs`, backfilling from `existing`.
    ///
    /// Each definition succeeds or fails on its own; a failure never blocks
    /// the remaining definitions.
    pub fn ensure<'a, I>(&mut self, specs: &[IndexSpec], existing: I) -> IndexReport
    where
        I: IntoIterator<Item = &'a Lobby> + Clone,
    {
        let mut report = IndexReport::default();

        for spec in specs {
            match self.check_new(spec) {
                Ok(true) => {
                    debug!(index = %spec.name, "Index already present");
                    report.existing.push(spec.name.clone());
                }
                Ok(false) => {
                    let mut index = BuiltIndex::empty(spec);
                    for lobby in existing.clone() {
                        index.insert(lobby);
                    }
                    self.specs.push(spec.clone());
                    self.built.push(index);
                    debug!(index = %spec.name, kind = ?spec.kind, "Built index");
                    report.created.push(spec.name.clone());
                }
                Err(e) => {
                    warn!(index = %spec.name, error = %e, "Index creation failed");
                    report.failed.push(e);
                }
            }
        }

        report
    }

    /// Ok(true) when an identical index exists, Ok(false) when it must be built
    fn check_new(&self, spec: &IndexSpec) -> StoreResult<bool> {
        spec.validate()?;

        if let Some(current) = self.specs.iter().find(|current| current.name == spec.name) {
            if current == spec {
                return Ok(true);
            }
            return Err(StoreError::IndexCreation {
                index: spec.name.clone(),
                reason: "an index with this name exists with a different definition".to_string(),
            });
        }

        if spec.kind == IndexKind::Text
            && self.specs.iter().any(|current| current.kind == IndexKind::Text)
        {
            return Err(StoreError::IndexCreation {
                index: spec.name.clone(),
                reason: "only one text index is allowed per collection".to_string(),
            });
        }

        Ok(false)
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|spec| spec.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.built.len()
    }

    pub fn is_empty(&self) -> bool {
        self.built.is_empty()
    }

    pub fn insert(&mut self, lobby: &Lobby) {
        for index in &mut self.built {
            index.insert(lobby);
        }
    }

    pub fn remove(&mut self, lobby: &Lobby) {
        for index in &mut self.built {
            index.remove(lobby);
        }
    }

    /// Swap the entries of `old` for those of `new`
    pub fn replace(&mut self, old: &Lobby, new: &Lobby) {
        self.remove(old);
        self.insert(new);
    }

    fn ttl(&self) -> Option<&TtlIndex> {
        self.built.iter().find_map(|index| match index {
            BuiltIndex::Ttl(index) => Some(index),
            _ => None,
        })
    }

    fn multikey(&self) -> Option<&MultikeyIndex> {
        self.built.iter().find_map(|index| match index {
            BuiltIndex::Multikey(index) => Some(index),
            _ => None,
        })
    }

    fn text(&self) -> Option<&TextIndex> {
        self.built.iter().find_map(|index| match index {
            BuiltIndex::Text(index) if index.covers_search_fields() => Some(index),
            _ => None,
        })
    }

    /// Expired ids from the TTL index, or None when no TTL index exists
    pub fn expired(&self, now: DateTime<Utc>) -> Option<Vec<LobbyId>> {
        self.ttl().map(|index| index.expired(now))
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.ttl().and_then(TtlIndex::next_deadline)
    }

    /// Candidate ids from the compound index pinning the longest key prefix.
    /// None means no compound index applies and the caller must scan.
    pub fn compound_candidates(&self, constraints: &FieldConstraints) -> Option<HashSet<LobbyId>> {
        let (index, prefix_len) = self
            .built
            .iter()
            .filter_map(|index| match index {
                BuiltIndex::Compound(index) => Some((index, index.usable_prefix(constraints))),
                _ => None,
            })
            .filter(|(_, prefix_len)| *prefix_len > 0)
            .max_by_key(|(_, prefix_len)| *prefix_len)?;

        Some(index.lookup(constraints, prefix_len))
    }

    /// Narrow a search to the lobbies any applicable index admits
    pub fn search_candidates(&self, filter: &LobbySearchFilter) -> Option<HashSet<LobbyId>> {
        let mut narrowed: Vec<HashSet<LobbyId>> = Vec::new();

        if let (Some(player_id), Some(index)) = (&filter.player_id, self.multikey()) {
            narrowed.push(index.get(player_id));
        }

        let tokens = filter.text_tokens();
        if !tokens.is_empty() {
            if let Some(index) = self.text() {
                narrowed.push(index.any_token(&tokens));
            }
        }

        if let Some(ids) = self.compound_candidates(&search_constraints(filter)) {
            narrowed.push(ids);
        }

        narrowed.into_iter().reduce(|acc, ids| &acc & &ids)
    }

    /// Narrow the featured listing
    pub fn featured_candidates(&self, game_id: Option<&str>) -> Option<HashSet<LobbyId>> {
        let mut constraints = FieldConstraints::new();
        constraints.insert(LobbyField::Status, vec![LobbyStatus::Open.into()]);
        constraints.insert(
            LobbyField::Visibility,
            vec![
                LobbyVisibility::Public.into(),
                LobbyVisibility::Matchmaking.into(),
            ],
        );
        if let Some(game_id) = game_id {
            constraints.insert(LobbyField::GameId, vec![KeyPart::Text(game_id.to_string())]);
        }
        self.compound_candidates(&constraints)
    }

    /// Narrow stats to open lobbies
    pub fn open_candidates(&self, game_id: Option<&str>) -> Option<HashSet<LobbyId>> {
        let mut constraints = FieldConstraints::new();
        constraints.insert(LobbyField::Status, vec![LobbyStatus::Open.into()]);
        if let Some(game_id) = game_id {
            constraints.insert(LobbyField::GameId, vec![KeyPart::Text(game_id.to_string())]);
        }
        self.compound_candidates(&constraints)
    }
}

/// Equality constraints a normalized search filter implies
fn search_constraints(filter: &LobbySearchFilter) -> FieldConstraints {
    let mut constraints = FieldConstraints::new();
    let text = |value: &Option<String>| value.as_ref().map(|v| vec![KeyPart::Text(v.clone())]);

    if let Some(values) = text(&filter.game_id) {
        constraints.insert(LobbyField::GameId, values);
    }
    if let Some(values) = text(&filter.region) {
        constraints.insert(LobbyField::Region, values);
    }
    if let Some(values) = text(&filter.creator_id) {
        constraints.insert(LobbyField::CreatorId, values);
    }
    if let Some(status) = filter.status {
        constraints.insert(LobbyField::Status, vec![status.into()]);
    }
    if let Some(featured) = filter.is_featured {
        constraints.insert(LobbyField::IsFeatured, vec![KeyPart::Flag(featured)]);
    }

    match filter.visibility {
        Some(visibility) => {
            constraints.insert(LobbyField::Visibility, vec![visibility.into()]);
        }
        None if !filter.includes_private() => {
            constraints.insert(
                LobbyField::Visibility,
                vec![
                    LobbyVisibility::Public.into(),
                    LobbyVisibility::Matchmaking.into(),
                ],
            );
        }
        None => {}
    }

    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewLobby;
    use crate::utils::{current_timestamp, generate_lobby_id};
    use chrono::Duration;

    fn lobby(new_lobby: NewLobby) -> Lobby {
        let now = current_timestamp();
        new_lobby.into_lobby(generate_lobby_id(), now, now + Duration::hours(1))
    }

    fn built(lobbies: &[Lobby]) -> IndexSet {
        let mut indexes = IndexSet::new();
        let report = indexes.ensure(&lobby_indexes(), lobbies.iter());
        assert!(report.is_complete());
        indexes
    }

    #[test]
    fn test_lobby_index_policy_is_valid() {
        let specs = lobby_indexes();
        assert_eq!(specs.len(), 7);
        for spec in &specs {
            spec.validate().unwrap();
        }

        let report = IndexSet::new().ensure(&specs, std::iter::empty());
        assert_eq!(report.created.len(), 7);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_invalid_specs_fail_individually() {
        let specs = vec![
            IndexSpec::compound("empty", &[]),
            IndexSpec::compound("with_tags", &[LobbyField::GameId, LobbyField::Tags]),
            IndexSpec::ttl("ttl_on_created", LobbyField::CreatedAt),
            IndexSpec::text("first_text", &[LobbyField::Name]),
            IndexSpec::text("second_text", &[LobbyField::Description]),
            IndexSpec::compound("game", &[LobbyField::GameId]),
        ];

        let report = IndexSet::new().ensure(&specs, std::iter::empty());

        assert_eq!(report.created, vec!["first_text".to_string(), "game".to_string()]);
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|e| match e {
                StoreError::IndexCreation { index, .. } => index.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(failed, vec!["empty", "with_tags", "ttl_on_created", "second_text"]);
    }

    #[test]
    fn test_ensure_is_idempotent_but_rejects_redefinition() {
        let mut indexes = IndexSet::new();
        indexes.ensure(&lobby_indexes(), std::iter::empty());

        let again = indexes.ensure(&lobby_indexes(), std::iter::empty());
        assert!(again.created.is_empty());
        assert_eq!(again.existing.len(), 7);

        let redefined = indexes.ensure(
            &[IndexSpec::compound("creator_status", &[LobbyField::CreatorId])],
            std::iter::empty(),
        );
        assert_eq!(redefined.failed.len(), 1);
        assert_eq!(indexes.len(), 7);
    }

    #[test]
    fn test_compound_prefix_lookup() {
        let eu_open = lobby(NewLobby::open("G1", "eu", "a", 2));
        let eu_locked = lobby(NewLobby::open("G1", "eu", "b", 2).with_status(LobbyStatus::Locked));
        let na_open = lobby(NewLobby::open("G1", "na", "c", 2));
        let other = lobby(NewLobby::open("G2", "eu", "d", 2));
        let lobbies = vec![eu_open.clone(), eu_locked.clone(), na_open.clone(), other];
        let indexes = built(&lobbies);

        let mut constraints = FieldConstraints::new();
        constraints.insert(LobbyField::GameId, vec![KeyPart::Text("G1".into())]);
        let ids = indexes.compound_candidates(&constraints).unwrap();
        assert_eq!(ids.len(), 3);

        constraints.insert(LobbyField::Region, vec![KeyPart::Text("eu".into())]);
        constraints.insert(LobbyField::Status, vec![LobbyStatus::Open.into()]);
        let ids = indexes.compound_candidates(&constraints).unwrap();
        assert_eq!(ids, HashSet::from([eu_open.id]));
    }

    #[test]
    fn test_prefix_lookup_yields_ids_in_key_order() {
        let mut index = CompoundIndex::new(vec![LobbyField::GameId, LobbyField::Region]);
        let na = lobby(NewLobby::open("G1", "na", "a", 2));
        let eu = lobby(NewLobby::open("G1", "eu", "b", 2));
        let other = lobby(NewLobby::open("G2", "eu", "c", 2));
        for entry in [&na, &eu, &other] {
            index.insert(entry);
        }

        let ids: Vec<LobbyId> = {
            let prefix = vec![KeyPart::Text("G1".to_string())];
            index.prefix_lookup(&prefix).collect()
        };
        assert_eq!(ids, vec![eu.id, na.id]);

        let none: Vec<LobbyId> = index
            .prefix_lookup(&[KeyPart::Text("G3".to_string())])
            .collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_no_applicable_index_means_scan() {
        let indexes = built(&[]);
        let filter = LobbySearchFilter::default().with_creator("a");

        // served by creator_status
        assert!(indexes.search_candidates(&filter).is_some());

        let empty = IndexSet::new();
        assert!(empty.search_candidates(&LobbySearchFilter::default()).is_none());
    }

    #[test]
    fn test_player_and_text_candidates() {
        let with_player = lobby(
            NewLobby::open("G1", "eu", "a", 2)
                .with_players(&["p1"])
                .with_name("Night Owls"),
        );
        let named = lobby(NewLobby::open("G1", "eu", "b", 2).with_tags(&["owls"]));
        let lobbies = vec![with_player.clone(), named.clone()];
        let indexes = built(&lobbies);

        let ids = indexes
            .search_candidates(&LobbySearchFilter::default().with_player("p1"))
            .unwrap();
        assert_eq!(ids, HashSet::from([with_player.id]));

        let ids = indexes
            .search_candidates(&LobbySearchFilter::default().with_text("owls"))
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_replace_moves_entries() {
        let mut lobby_a = lobby(NewLobby::open("G1", "eu", "a", 2));
        let mut indexes = built(std::slice::from_ref(&lobby_a));

        let before = lobby_a.clone();
        lobby_a.seat_player("p9");
        lobby_a.status = LobbyStatus::Locked;
        indexes.replace(&before, &lobby_a);

        let ids = indexes
            .search_candidates(&LobbySearchFilter::default().with_player("p9"))
            .unwrap();
        assert_eq!(ids, HashSet::from([lobby_a.id]));
        assert!(indexes.open_candidates(None).unwrap().is_empty());
    }

    #[test]
    fn test_ttl_expired_in_deadline_order() {
        let now = current_timestamp();
        let soon = NewLobby::open("G1", "eu", "a", 2)
            .expiring_at(now - Duration::seconds(5))
            .into_lobby(generate_lobby_id(), now, now);
        let sooner = NewLobby::open("G1", "eu", "b", 2)
            .expiring_at(now - Duration::seconds(50))
            .into_lobby(generate_lobby_id(), now, now);
        let later = NewLobby::open("G1", "eu", "c", 2)
            .expiring_at(now + Duration::minutes(5))
            .into_lobby(generate_lobby_id(), now, now);
        let indexes = built(&[soon.clone(), sooner.clone(), later]);

        assert_eq!(indexes.expired(now), Some(vec![sooner.id, soon.id]));
        assert_eq!(indexes.next_deadline(), Some(sooner.expires_at));
        assert_eq!(IndexSet::new().expired(now), None);
    }
}
