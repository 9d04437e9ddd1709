//! Command consumer pipeline against a mocked domain handler

use crate::fixtures::{delivery, envelope, payload, RecordingAcker};
use async_trait::async_trait;
use lobby_hub::amqp::handlers::{
    CommandConsumer, CommandHandler, ConsumerExit, Disposition, InboundDelivery,
};
use lobby_hub::amqp::messages::{
    CommandMessage, EventEnvelope, EventType, PlayerQueuedPayload, SkipReason,
};
use lobby_hub::amqp::ownership::OwnershipField;
use lobby_hub::error::{LobbyHubError, Result};
use mockall::mock;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

mock! {
    pub Handler {}

    #[async_trait]
    impl CommandHandler for Handler {
        async fn handle_player_queued(
            &self,
            envelope: &EventEnvelope,
            payload: &PlayerQueuedPayload,
        ) -> Result<()>;
    }
}

fn never_called() -> Arc<MockHandler> {
    let mut handler = MockHandler::new();
    handler.expect_handle_player_queued().times(0);
    Arc::new(handler)
}

#[tokio::test]
async fn test_handler_receives_envelope_and_payload_unmodified() {
    let envelope = envelope("owner-7");
    let payload = payload("p1", "G1", "eu-west");
    let (expected_envelope, expected_payload) = (envelope.clone(), payload.clone());

    let mut handler = MockHandler::new();
    handler
        .expect_handle_player_queued()
        .withf(move |e, p| *e == expected_envelope && *p == expected_payload)
        .times(1)
        .returning(|_, _| Ok(()));

    let consumer = CommandConsumer::new(Arc::new(handler), "lobby.commands");
    let bytes = CommandMessage::new(envelope, payload).to_bytes().unwrap();

    let disposition = consumer.process(&bytes).await.unwrap();
    assert_eq!(disposition, Disposition::Dispatched(EventType::PlayerQueued));
}

#[tokio::test]
async fn test_missing_envelope_is_skipped() {
    let consumer = CommandConsumer::new(never_called(), "lobby.commands");
    let bytes = serde_json::to_vec(&json!({ "envelope": null, "payload": {} })).unwrap();

    let disposition = consumer.process(&bytes).await.unwrap();
    assert_eq!(disposition, Disposition::Skipped(SkipReason::MissingEnvelope));
}

#[tokio::test]
async fn test_unknown_event_type_is_skipped() {
    let consumer = CommandConsumer::new(never_called(), "lobby.commands");
    let mut envelope = envelope("owner-1");
    envelope.event_type = "LobbyClosed".to_string();
    let bytes = CommandMessage::new(envelope, json!({})).to_bytes().unwrap();

    match consumer.process(&bytes).await.unwrap() {
        Disposition::Skipped(SkipReason::UnknownEventType { event_type }) => {
            assert_eq!(event_type, "LobbyClosed")
        }
        other => panic!("unexpected disposition: {:?}", other),
    }
}

#[tokio::test]
async fn test_each_blank_ownership_field_is_reported() {
    let cases = [
        (OwnershipField::ResourceOwnerId, " ", "tenant-1", "client-1", "p1"),
        (OwnershipField::TenantId, "owner-1", "", "client-1", "p1"),
        (OwnershipField::ClientId, "owner-1", "tenant-1", "\t", "p1"),
        (OwnershipField::PlayerId, "owner-1", "tenant-1", "client-1", ""),
    ];

    for (field, owner, tenant, client, player) in cases {
        let consumer = CommandConsumer::new(never_called(), "lobby.commands");
        let mut payload = payload(player, "G1", "eu-west");
        payload.tenant_id = tenant.to_string();
        payload.client_id = client.to_string();
        let bytes = CommandMessage::new(envelope(owner), payload)
            .to_bytes()
            .unwrap();

        match consumer.process(&bytes).await.unwrap() {
            Disposition::Skipped(SkipReason::OwnershipInvalid(err)) => {
                assert_eq!(err.field, field)
            }
            other => panic!("{:?}: unexpected disposition {:?}", field, other),
        }
    }
}

#[tokio::test]
async fn test_handler_failure_requeues_and_later_success_acks() {
    let mut handler = MockHandler::new();
    let mut seq = mockall::Sequence::new();
    handler
        .expect_handle_player_queued()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| {
            Err(LobbyHubError::InternalError {
                message: "store timeout".to_string(),
            }
            .into())
        });
    handler
        .expect_handle_player_queued()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let consumer = CommandConsumer::new(Arc::new(handler), "lobby.commands");
    let acker = RecordingAcker::new();
    let bytes = CommandMessage::new(envelope("owner-1"), payload("p1", "G1", "eu-west"))
        .to_bytes()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundDelivery>();
    tx.send(delivery(10, bytes.clone())).unwrap();
    tx.send(InboundDelivery {
        delivery_tag: 11,
        redelivered: true,
        content: bytes,
    })
    .unwrap();
    drop(tx);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let summary = consumer.run(&mut rx, &acker, &mut shutdown_rx).await;

    assert_eq!(summary.settled, 2);
    assert_eq!(acker.requeued(), vec![10]);
    assert_eq!(acker.acked(), vec![11]);
}

#[tokio::test]
async fn test_failed_ack_keeps_the_loop_consuming() {
    let mut handler = MockHandler::new();
    handler
        .expect_handle_player_queued()
        .times(3)
        .returning(|_, _| Ok(()));

    let consumer = CommandConsumer::new(Arc::new(handler), "lobby.commands");
    let acker = RecordingAcker::failing_first_ack();

    let (tx, mut rx) = mpsc::unbounded_channel::<InboundDelivery>();
    for (tag, player) in [(1, "p1"), (2, "p2"), (3, "p3")] {
        let bytes = CommandMessage::new(envelope("owner-1"), payload(player, "G1", "eu-west"))
            .to_bytes()
            .unwrap();
        tx.send(delivery(tag, bytes)).unwrap();
    }
    drop(tx);
    let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let summary = consumer.run(&mut rx, &acker, &mut shutdown_rx).await;

    assert_eq!(summary.settled, 2);
    assert_eq!(summary.settle_failures, 1);
    assert_eq!(summary.exit, ConsumerExit::StreamClosed);
    assert_eq!(acker.acked(), vec![2, 3]);
}

#[tokio::test]
async fn test_handler_error_is_returned_unmodified() {
    let mut handler = MockHandler::new();
    handler.expect_handle_player_queued().returning(|_, _| {
        Err(LobbyHubError::ConfigurationError {
            message: "no rules for game".to_string(),
        }
        .into())
    });

    let consumer = CommandConsumer::new(Arc::new(handler), "lobby.commands");
    let bytes = CommandMessage::new(envelope("owner-1"), payload("p1", "G1", "eu-west"))
        .to_bytes()
        .unwrap();

    let err = consumer.process(&bytes).await.unwrap_err();
    match err.downcast_ref::<LobbyHubError>() {
        Some(LobbyHubError::ConfigurationError { message }) => {
            assert_eq!(message, "no rules for game")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
