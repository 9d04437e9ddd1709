//! Lobby store behavior through the repository trait

use crate::fixtures::{indexed_store, seed_g1};
use chrono::Duration as ChronoDuration;
use lobby_hub::error::StoreError;
use lobby_hub::lobby::{
    InMemoryLobbyStore, LobbyRepository, LobbySearchFilter, LobbyStoreConfig, Pagination,
};
use lobby_hub::types::{LobbyStatus, LobbyVisibility, NewLobby};
use lobby_hub::utils::current_timestamp;
use std::sync::Arc;

#[tokio::test]
async fn test_default_search_hides_private_and_ranks_featured_first() {
    let store = indexed_store().await;
    let (featured, public, _private) = seed_g1(&store).await;

    let page = store
        .search(&LobbySearchFilter::for_game("G1"), Pagination::new(0, 20))
        .await
        .unwrap();

    assert_eq!(page.total, 2);
    let ids: Vec<_> = page.items.iter().map(|lobby| lobby.id).collect();
    assert_eq!(ids, vec![featured.id, public.id]);
}

#[tokio::test]
async fn test_stats_count_private_open_lobbies() {
    let store = indexed_store().await;
    seed_g1(&store).await;

    let stats = store.get_stats(Some("G1")).await.unwrap();

    assert_eq!(stats.total_active_lobbies, 3);
    assert_eq!(stats.total_players_waiting, 4);
    assert_eq!(stats.lobbies_by_region.get("eu-west"), Some(&2));
    assert_eq!(stats.lobbies_by_region.get("us-east"), Some(&1));
}

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let store = indexed_store().await;

    let created = store
        .create(
            NewLobby::open("G2", "ap-south", "zoe", 6)
                .with_name("Weekend league")
                .with_description("Ranked ladder games")
                .with_game_mode("ranked")
                .with_tags(&["ladder", "competitive"]),
        )
        .await
        .unwrap();

    let fetched = store.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched, Some(created.clone()));
    assert_eq!(created.capacity(), 6);
    assert!(created.expires_at > created.created_at);

    assert!(store.delete(created.id).await.unwrap());
    assert_eq!(store.get_by_id(created.id).await.unwrap(), None);
    assert!(!store.delete(created.id).await.unwrap());
}

#[tokio::test]
async fn test_update_of_deleted_lobby_is_not_found() {
    let store = indexed_store().await;
    let lobby = store
        .create(NewLobby::open("G1", "eu-west", "alice", 4))
        .await
        .unwrap();
    store.delete(lobby.id).await.unwrap();

    let err = store.update(lobby.clone()).await.unwrap_err();
    assert_eq!(err, StoreError::NotFound { lobby_id: lobby.id });
}

#[tokio::test]
async fn test_text_search_matches_any_word() {
    let store = indexed_store().await;
    let (featured, public, _) = seed_g1(&store).await;

    let page = store
        .search(
            &LobbySearchFilter::for_game("G1").with_text("FRIDAY"),
            Pagination::new(0, 20),
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, featured.id);

    let page = store
        .search(
            &LobbySearchFilter::for_game("G1").with_text("casual friday"),
            Pagination::new(0, 20),
        )
        .await
        .unwrap();
    let mut ids: Vec<_> = page.items.iter().map(|lobby| lobby.id).collect();
    ids.sort();
    let mut expected = vec![featured.id, public.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_pagination_reports_total_beyond_page() {
    let store = indexed_store().await;
    for n in 0..7 {
        store
            .create(NewLobby::open("G3", "eu-west", format!("host-{}", n), 4))
            .await
            .unwrap();
    }

    let first = store
        .search(&LobbySearchFilter::for_game("G3"), Pagination::new(0, 5))
        .await
        .unwrap();
    let second = store
        .search(&LobbySearchFilter::for_game("G3"), Pagination::new(5, 5))
        .await
        .unwrap();

    assert_eq!(first.total, 7);
    assert_eq!(first.items.len(), 5);
    assert_eq!(second.items.len(), 2);
    assert!(first
        .items
        .iter()
        .all(|lobby| second.items.iter().all(|other| other.id != lobby.id)));
}

#[tokio::test]
async fn test_featured_listing_excludes_private_and_closed() {
    let store = indexed_store().await;
    let (featured, public, _private) = seed_g1(&store).await;
    store
        .create(
            NewLobby::open("G1", "eu-west", "frank", 4)
                .with_status(LobbyStatus::Locked)
                .featured(),
        )
        .await
        .unwrap();

    let listing = store.get_featured(Some("G1"), None).await.unwrap();

    let ids: Vec<_> = listing.iter().map(|lobby| lobby.id).collect();
    assert_eq!(ids, vec![featured.id, public.id]);
    assert!(listing
        .iter()
        .all(|lobby| lobby.visibility != LobbyVisibility::Private));
}

#[tokio::test]
async fn test_expired_lobbies_are_swept() {
    let store = indexed_store().await;
    let now = current_timestamp();
    let stale = store
        .create(NewLobby::open("G1", "eu-west", "old", 4).expiring_at(now - ChronoDuration::seconds(5)))
        .await
        .unwrap();
    let fresh = store
        .create(NewLobby::open("G1", "eu-west", "new", 4).expiring_at(now + ChronoDuration::hours(1)))
        .await
        .unwrap();

    let removed = store.remove_expired(now).await.unwrap();

    assert_eq!(removed, 1);
    assert_eq!(store.get_by_id(stale.id).await.unwrap(), None);
    assert!(store.get_by_id(fresh.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_concurrent_creates_are_all_visible() {
    let store: Arc<InMemoryLobbyStore> = Arc::new(InMemoryLobbyStore::new(LobbyStoreConfig::default()));

    let creates = (0..50).map(|n| {
        let store = store.clone();
        async move {
            store
                .create(NewLobby::open("G4", "eu-west", format!("host-{}", n), 2))
                .await
        }
    });
    let results = futures::future::join_all(creates).await;

    assert!(results.iter().all(|result| result.is_ok()));
    assert_eq!(store.count().await.unwrap(), 50);
    let stats = store.get_stats(Some("G4")).await.unwrap();
    assert_eq!(stats.total_active_lobbies, 50);
}
