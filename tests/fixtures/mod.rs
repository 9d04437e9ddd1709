//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use lobby_hub::amqp::handlers::{Acknowledger, InboundDelivery};
use lobby_hub::amqp::messages::{CommandMessage, EventEnvelope, EventType, PlayerQueuedPayload};
use lobby_hub::error::{LobbyHubError, Result};
use lobby_hub::lobby::{
    lobby_indexes, GameRules, InMemoryLobbyStore, LobbyManager, LobbyRepository,
    LobbyStoreConfig, StaticGameRulesProvider,
};
use lobby_hub::types::{Lobby, LobbyVisibility, NewLobby};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked(u64),
    Requeued(u64),
}

/// Acknowledger that records settlements instead of talking to a broker
#[derive(Debug, Default)]
pub struct RecordingAcker {
    settled: Mutex<Vec<Settlement>>,
    fail_next_ack: AtomicBool,
}

impl RecordingAcker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first ack errors as if the channel dropped; later ones succeed
    pub fn failing_first_ack() -> Self {
        Self {
            fail_next_ack: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settled
            .lock()
            .map(|settled| settled.clone())
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.settlements()
            .into_iter()
            .filter_map(|s| match s {
                Settlement::Acked(tag) => Some(tag),
                Settlement::Requeued(_) => None,
            })
            .collect()
    }

    pub fn requeued(&self) -> Vec<u64> {
        self.settlements()
            .into_iter()
            .filter_map(|s| match s {
                Settlement::Requeued(tag) => Some(tag),
                Settlement::Acked(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        if self.fail_next_ack.swap(false, Ordering::SeqCst) {
            return Err(LobbyHubError::AmqpConnectionFailed {
                message: format!("channel closed before ack of {}", delivery_tag),
            }
            .into());
        }
        if let Ok(mut settled) = self.settled.lock() {
            settled.push(Settlement::Acked(delivery_tag));
        }
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        if let Ok(mut settled) = self.settled.lock() {
            settled.push(Settlement::Requeued(delivery_tag));
        }
        Ok(())
    }
}

pub fn envelope(owner: &str) -> EventEnvelope {
    EventEnvelope::new(EventType::PlayerQueued, "gateway", "lobby-queue", owner)
}

pub fn payload(player_id: &str, game_id: &str, region: &str) -> PlayerQueuedPayload {
    PlayerQueuedPayload {
        player_id: player_id.to_string(),
        game_id: game_id.to_string(),
        region: region.to_string(),
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
    }
}

/// Encoded PlayerQueued message with a valid owner
pub fn player_queued_bytes(player_id: &str, game_id: &str, region: &str) -> Vec<u8> {
    CommandMessage::new(envelope("owner-1"), payload(player_id, game_id, region))
        .to_bytes()
        .expect("encode command message")
}

pub fn delivery(delivery_tag: u64, content: Vec<u8>) -> InboundDelivery {
    InboundDelivery {
        delivery_tag,
        redelivered: false,
        content,
    }
}

/// Store with every lobby index in place
pub async fn indexed_store() -> Arc<InMemoryLobbyStore> {
    let store = InMemoryLobbyStore::new(LobbyStoreConfig::default());
    let report = store.ensure_indexes(&lobby_indexes()).await;
    assert!(report.is_complete(), "index build failed: {:?}", report.failed);
    Arc::new(store)
}

/// Manager over `store` seating `slots` players per lobby
pub fn manager(store: Arc<InMemoryLobbyStore>, slots: usize) -> LobbyManager {
    let rules = StaticGameRulesProvider::with_defaults(GameRules::new(
        slots,
        "ranked",
        Duration::from_secs(900),
    ))
    .expect("valid rules");
    LobbyManager::new(store, Arc::new(rules))
}

/// Three G1 lobbies: featured Public 3/5, Public 1/5, Private 0/5
pub async fn seed_g1(store: &InMemoryLobbyStore) -> (Lobby, Lobby, Lobby) {
    let featured = store
        .create(
            NewLobby::open("G1", "eu-west", "alice", 5)
                .with_name("Friday night")
                .with_players(&["alice", "bob", "carol"])
                .featured(),
        )
        .await
        .expect("create featured lobby");
    let public = store
        .create(
            NewLobby::open("G1", "eu-west", "dave", 5)
                .with_name("Casual")
                .with_players(&["dave"]),
        )
        .await
        .expect("create public lobby");
    let private = store
        .create(
            NewLobby::open("G1", "us-east", "erin", 5)
                .with_name("Invite only")
                .with_visibility(LobbyVisibility::Private),
        )
        .await
        .expect("create private lobby");
    (featured, public, private)
}
