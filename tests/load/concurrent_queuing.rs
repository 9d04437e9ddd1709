//! Concurrent queue commands against one manager and store
//!
//! Seat assignment must stay consistent when many commands race: no player
//! seated twice, no lobby over capacity.

use crate::fixtures::{envelope, indexed_store, manager, payload};
use lobby_hub::amqp::handlers::CommandHandler;
use lobby_hub::lobby::{LobbyRepository, LobbySearchFilter, Pagination};
use lobby_hub::types::{LobbyStatus, LobbyVisibility};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_100_concurrent_queue_commands() {
    let store = indexed_store().await;
    let manager = Arc::new(manager(store.clone(), 4));
    let start_time = Instant::now();

    let handles: Vec<_> = (0..100)
        .map(|n| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let payload = payload(&format!("load-player-{}", n), "G1", "eu-west");
                manager
                    .handle_player_queued(&envelope("owner-1"), &payload)
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.expect("task panicked").expect("queue command failed");
    }
    assert!(start_time.elapsed() < Duration::from_secs(5));

    let page = store
        .search(
            &LobbySearchFilter::for_game("G1").with_visibility(LobbyVisibility::Matchmaking),
            Pagination::new(0, 100),
        )
        .await
        .unwrap();

    assert_eq!(page.total, 25);
    let mut seated = HashSet::new();
    for lobby in &page.items {
        assert_eq!(lobby.filled_slots(), 4);
        assert_eq!(lobby.status, LobbyStatus::Full);
        for slot in &lobby.player_slots {
            let player = slot.player_id.clone().expect("slot filled");
            assert!(seated.insert(player), "player seated twice");
        }
    }
    assert_eq!(seated.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_seat_once() {
    let store = indexed_store().await;
    let manager = Arc::new(manager(store.clone(), 4));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .handle_player_queued(&envelope("owner-1"), &payload("dup", "G1", "eu-west"))
                    .await
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.expect("task panicked").expect("queue command failed");
    }

    let page = store
        .search(
            &LobbySearchFilter::default().with_player("dup"),
            Pagination::new(0, 10),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(manager.get_stats().duplicates_ignored, 19);
}
