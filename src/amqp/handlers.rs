//! Command consumer: decodes, validates and dispatches inbound lobby commands
//!
//! Each delivery walks `Received → Deserialized → EnvelopeChecked →
//! OwnershipChecked → Dispatched → Acknowledged`. Permanently unprocessable
//! messages are acknowledged and skipped; handler failures are requeued for
//! redelivery.

use crate::amqp::messages::{
    CommandEvent, CommandMessage, EventEnvelope, EventType, PlayerQueuedPayload, SkipReason,
};
use crate::amqp::ownership::validate_ownership;
use crate::error::{LobbyHubError, Result};
use crate::metrics::MetricsCollector;
use amqprs::channel::{
    BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicQosArguments, Channel,
    ConsumerMessage, QueueDeclareArguments,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Domain handler wired behind the consumer.
///
/// Deliveries are at-least-once: the same event may be handed over more than
/// once, so implementations must be idempotent. Returning an error requeues
/// the message.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_player_queued(
        &self,
        envelope: &EventEnvelope,
        payload: &PlayerQueuedPayload,
    ) -> Result<()>;
}

/// Outcome of processing one message that should be acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Dispatched(EventType),
    Skipped(SkipReason),
}

impl Disposition {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Disposition::Skipped(_))
    }

    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Dispatched(_) => "dispatched",
            Disposition::Skipped(_) => "skipped",
        }
    }
}

/// A broker delivery reduced to what the consumer needs
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content: Vec<u8>,
}

/// Source of deliveries for the receive loop
#[async_trait]
pub trait DeliveryStream: Send {
    /// Next delivery, or `None` once the stream is closed
    async fn next_delivery(&mut self) -> Option<InboundDelivery>;
}

#[async_trait]
impl DeliveryStream for mpsc::UnboundedReceiver<InboundDelivery> {
    async fn next_delivery(&mut self) -> Option<InboundDelivery> {
        self.recv().await
    }
}

#[async_trait]
impl DeliveryStream for mpsc::UnboundedReceiver<ConsumerMessage> {
    async fn next_delivery(&mut self) -> Option<InboundDelivery> {
        loop {
            let message = self.recv().await?;
            match (message.deliver, message.content) {
                (Some(deliver), Some(content)) => {
                    return Some(InboundDelivery {
                        delivery_tag: deliver.delivery_tag(),
                        redelivered: deliver.redelivered(),
                        content,
                    })
                }
                _ => warn!("Dropping consumer message without delivery frame or body"),
            }
        }
    }
}

/// Settles deliveries with the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Commit the delivery; it will not be redelivered
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Reject the delivery and ask the broker to redeliver it
    async fn requeue(&self, delivery_tag: u64) -> Result<()>;
}

#[async_trait]
impl Acknowledger for Channel {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
            .map_err(|e| LobbyHubError::AmqpConnectionFailed {
                message: format!("Failed to ack delivery {}: {}", delivery_tag, e),
            })?;
        Ok(())
    }

    async fn requeue(&self, delivery_tag: u64) -> Result<()> {
        self.basic_nack(BasicNackArguments::new(delivery_tag, false, true))
            .await
            .map_err(|e| LobbyHubError::AmqpConnectionFailed {
                message: format!("Failed to nack delivery {}: {}", delivery_tag, e),
            })?;
        Ok(())
    }
}

/// Declare the durable command queue and start a manual-ack consumer on it.
///
/// Returns the consumer tag and the receiver the broker pushes deliveries into.
pub async fn open_command_stream(
    channel: &Channel,
    queue_name: &str,
    prefetch_count: u16,
) -> Result<(String, mpsc::UnboundedReceiver<ConsumerMessage>)> {
    let declare_args = QueueDeclareArguments::new(queue_name)
        .durable(true)
        .auto_delete(false)
        .finish();
    channel
        .queue_declare(declare_args)
        .await
        .map_err(|e| LobbyHubError::AmqpConnectionFailed {
            message: format!("Failed to declare queue {}: {}", queue_name, e),
        })?;

    channel
        .basic_qos(BasicQosArguments::new(0, prefetch_count, false))
        .await
        .map_err(|e| LobbyHubError::AmqpConnectionFailed {
            message: format!("Failed to set prefetch on {}: {}", queue_name, e),
        })?;

    let consumer_tag = format!("lobby-commands-{}", uuid::Uuid::new_v4());
    let args = BasicConsumeArguments::new(queue_name, &consumer_tag);
    let (consumer_tag, receiver) =
        channel
            .basic_consume_rx(args)
            .await
            .map_err(|e| LobbyHubError::AmqpConnectionFailed {
                message: format!("Failed to start consuming {}: {}", queue_name, e),
            })?;

    info!(
        queue = queue_name,
        consumer_tag = %consumer_tag,
        prefetch_count,
        "Started consuming command queue"
    );
    Ok((consumer_tag, receiver))
}

/// Why the receive loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    Shutdown,
    /// The broker side went away; nothing more will arrive on this stream
    StreamClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub settled: u64,
    pub settle_failures: u64,
    pub exit: ConsumerExit,
}

/// Turns command-queue deliveries into validated handler calls
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    queue_name: String,
    metrics: Option<Arc<MetricsCollector>>,
    redelivery_delay: Duration,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, queue_name: impl Into<String>) -> Self {
        Self {
            handler,
            queue_name: queue_name.into(),
            metrics: None,
            redelivery_delay: Duration::ZERO,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Pause before requeueing a failed delivery
    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Run one message through the pipeline.
    ///
    /// `Ok` means the message must be acknowledged (dispatched or skipped).
    /// `Err` is the handler's error, returned unmodified, and means the
    /// message must be redelivered.
    pub async fn process(&self, content: &[u8]) -> Result<Disposition> {
        debug!(size = content.len(), "Command message received");

        let message = match CommandMessage::from_bytes(content) {
            Ok(message) => message,
            Err(e) => {
                return Ok(self.skip(
                    SkipReason::Malformed {
                        reason: e.to_string(),
                    },
                    None,
                ))
            }
        };

        let envelope = match message.envelope {
            Some(envelope) => envelope,
            None => return Ok(self.skip(SkipReason::MissingEnvelope, None)),
        };

        let event_type = match EventType::parse(&envelope.event_type) {
            Some(event_type) => event_type,
            None => {
                let reason = SkipReason::UnknownEventType {
                    event_type: envelope.event_type.clone(),
                };
                return Ok(self.skip(reason, Some(&envelope)));
            }
        };

        let event = match CommandEvent::from_parts(event_type, envelope.clone(), message.payload) {
            Ok(event) => event,
            Err(reason) => return Ok(self.skip(reason, Some(&envelope))),
        };

        debug!(
            event_id = %envelope.id,
            event_type = %event_type,
            data_schema_version = envelope.data_schema_version,
            "Envelope checked"
        );

        if let Err(reason) = Self::check_ownership(&event) {
            return Ok(self.skip(reason, Some(&envelope)));
        }

        self.dispatch(event).await?;
        Ok(Disposition::Dispatched(event_type))
    }

    /// Receive loop: process deliveries one at a time until the stream
    /// closes or a shutdown signal arrives. Shutdown is observed only between
    /// messages, so an in-flight delivery is always settled first.
    ///
    /// A failed ack or nack is logged and the loop moves on; the broker
    /// redelivers anything left unsettled.
    pub async fn run<S, A>(
        &self,
        deliveries: &mut S,
        acker: &A,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> RunSummary
    where
        S: DeliveryStream + ?Sized,
        A: Acknowledger + ?Sized,
    {
        info!(queue = %self.queue_name, "Command consumer loop started");
        let mut summary = RunSummary {
            settled: 0,
            settle_failures: 0,
            exit: ConsumerExit::StreamClosed,
        };

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    summary.exit = ConsumerExit::Shutdown;
                    break;
                }
                next = deliveries.next_delivery() => match next {
                    Some(delivery) => delivery,
                    None => {
                        warn!(queue = %self.queue_name, settled = summary.settled, "Delivery stream closed");
                        break;
                    }
                },
            };

            let delivery_tag = delivery.delivery_tag;
            match self.settle(delivery, acker).await {
                Ok(()) => summary.settled += 1,
                Err(e) => {
                    summary.settle_failures += 1;
                    error!(
                        queue = %self.queue_name,
                        delivery_tag,
                        error = %e,
                        "Failed to settle delivery, broker will redeliver it"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_message("settle_failed");
                    }
                }
            }
        }

        info!(
            queue = %self.queue_name,
            settled = summary.settled,
            settle_failures = summary.settle_failures,
            exit = ?summary.exit,
            "Command consumer loop stopped"
        );
        summary
    }

    /// Process a delivery and ack or requeue it
    async fn settle<A>(&self, delivery: InboundDelivery, acker: &A) -> Result<()>
    where
        A: Acknowledger + ?Sized,
    {
        let start_time = Instant::now();

        match self.process(&delivery.content).await {
            Ok(disposition) => {
                acker.ack(delivery.delivery_tag).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_message(disposition.label());
                }
                debug!(
                    delivery_tag = delivery.delivery_tag,
                    outcome = disposition.label(),
                    processing_ms = start_time.elapsed().as_secs_f64() * 1000.0,
                    "Delivery acknowledged"
                );
            }
            Err(e) => {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    redelivered = delivery.redelivered,
                    error = %e,
                    "Handler failed, requeueing delivery"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_message("requeued");
                }
                if !self.redelivery_delay.is_zero() {
                    tokio::time::sleep(self.redelivery_delay).await;
                }
                acker.requeue(delivery.delivery_tag).await?;
            }
        }

        Ok(())
    }

    fn check_ownership(event: &CommandEvent) -> std::result::Result<(), SkipReason> {
        match event {
            CommandEvent::PlayerQueued { envelope, payload } => {
                validate_ownership(envelope, payload)?;
                info!(
                    event_id = %envelope.id,
                    player_id = %payload.player_id,
                    tenant_id = %payload.tenant_id,
                    client_id = %payload.client_id,
                    "Ownership validated"
                );
                Ok(())
            }
        }
    }

    async fn dispatch(&self, event: CommandEvent) -> Result<()> {
        let event_type = event.event_type();
        let start_time = Instant::now();

        let result = match &event {
            CommandEvent::PlayerQueued { envelope, payload } => {
                self.handler.handle_player_queued(envelope, payload).await
            }
        };

        let elapsed = start_time.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_handler_duration(event_type.as_str(), elapsed);
        }

        match &result {
            Ok(()) => info!(
                event_id = %event.envelope().id,
                event_type = %event_type,
                handler_ms = elapsed.as_secs_f64() * 1000.0,
                "Event dispatched"
            ),
            Err(e) => warn!(
                event_id = %event.envelope().id,
                event_type = %event_type,
                error = %e,
                "Handler returned error"
            ),
        }

        result
    }

    fn skip(&self, reason: SkipReason, envelope: Option<&EventEnvelope>) -> Disposition {
        match envelope {
            Some(envelope) => warn!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                reason = %reason,
                "Skipping unprocessable message"
            ),
            None => warn!(reason = %reason, "Skipping unprocessable message"),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_skip(reason.label());
        }

        Disposition::Skipped(reason)
    }
}

/// Handler that records every call; optionally fails to exercise redelivery
pub struct RecordingCommandHandler {
    pub received: Arc<tokio::sync::Mutex<Vec<(EventEnvelope, PlayerQueuedPayload)>>>,
    fail: bool,
}

impl Default for RecordingCommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCommandHandler {
    pub fn new() -> Self {
        Self {
            received: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A handler that records the call and then returns an error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub async fn call_count(&self) -> usize {
        self.received.lock().await.len()
    }
}

#[async_trait]
impl CommandHandler for RecordingCommandHandler {
    async fn handle_player_queued(
        &self,
        envelope: &EventEnvelope,
        payload: &PlayerQueuedPayload,
    ) -> Result<()> {
        self.received
            .lock()
            .await
            .push((envelope.clone(), payload.clone()));

        if self.fail {
            return Err(LobbyHubError::InternalError {
                message: "lobby store unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::ownership::OwnershipField;

    fn player_queued_bytes(owner: &str, tenant: &str) -> (Vec<u8>, EventEnvelope, PlayerQueuedPayload) {
        let envelope = EventEnvelope::new(EventType::PlayerQueued, "gateway", "player-1", owner);
        let payload = PlayerQueuedPayload {
            player_id: "player-1".to_string(),
            game_id: "G1".to_string(),
            region: "eu-west".to_string(),
            tenant_id: tenant.to_string(),
            client_id: "client-1".to_string(),
        };
        let bytes = CommandMessage::new(envelope.clone(), payload.clone())
            .to_bytes()
            .unwrap();
        (bytes, envelope, payload)
    }

    #[derive(Default)]
    struct RecordingAcker {
        settled: tokio::sync::Mutex<Vec<(u64, bool)>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self, delivery_tag: u64) -> Result<()> {
            self.settled.lock().await.push((delivery_tag, true));
            Ok(())
        }

        async fn requeue(&self, delivery_tag: u64) -> Result<()> {
            self.settled.lock().await.push((delivery_tag, false));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_valid_event_is_dispatched_unmodified() {
        let handler = Arc::new(RecordingCommandHandler::new());
        let consumer = CommandConsumer::new(handler.clone(), "test.commands");
        let (bytes, envelope, payload) = player_queued_bytes("owner-1", "tenant-1");

        let disposition = consumer.process(&bytes).await.unwrap();

        assert_eq!(disposition, Disposition::Dispatched(EventType::PlayerQueued));
        let received = handler.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (envelope, payload));
    }

    #[tokio::test]
    async fn test_invalid_json_is_skipped() {
        let handler = Arc::new(RecordingCommandHandler::new());
        let consumer = CommandConsumer::new(handler.clone(), "test.commands");

        let disposition = consumer.process(b"{not json").await.unwrap();

        assert!(matches!(
            disposition,
            Disposition::Skipped(SkipReason::Malformed { .. })
        ));
        assert_eq!(handler.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_ownership_failure_is_skipped_with_field() {
        let handler = Arc::new(RecordingCommandHandler::new());
        let consumer = CommandConsumer::new(handler.clone(), "test.commands");
        let (bytes, _, _) = player_queued_bytes("owner-1", "  ");

        let disposition = consumer.process(&bytes).await.unwrap();

        match disposition {
            Disposition::Skipped(SkipReason::OwnershipInvalid(err)) => {
                assert_eq!(err.field, OwnershipField::TenantId)
            }
            other => panic!("unexpected disposition: {:?}", other),
        }
        assert_eq!(handler.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let handler = Arc::new(RecordingCommandHandler::failing());
        let consumer = CommandConsumer::new(handler.clone(), "test.commands");
        let (bytes, _, _) = player_queued_bytes("owner-1", "tenant-1");

        let err = consumer.process(&bytes).await.unwrap_err();

        assert!(err.to_string().contains("lobby store unavailable"));
        assert_eq!(handler.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_run_acks_skips_and_requeues_failures() {
        let handler = Arc::new(RecordingCommandHandler::failing());
        let consumer = CommandConsumer::new(handler, "test.commands");
        let acker = RecordingAcker::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let (valid, _, _) = player_queued_bytes("owner-1", "tenant-1");
        tx.send(InboundDelivery {
            delivery_tag: 1,
            redelivered: false,
            content: b"garbage".to_vec(),
        })
        .unwrap();
        tx.send(InboundDelivery {
            delivery_tag: 2,
            redelivered: false,
            content: valid,
        })
        .unwrap();
        drop(tx);

        let summary = consumer.run(&mut rx, &acker, &mut shutdown_rx).await;

        assert_eq!(summary.settled, 2);
        assert_eq!(summary.exit, ConsumerExit::StreamClosed);
        assert_eq!(*acker.settled.lock().await, vec![(1, true), (2, false)]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let consumer = CommandConsumer::new(Arc::new(RecordingCommandHandler::new()), "q");
        let acker = RecordingAcker::default();
        let (_tx, mut rx) = mpsc::unbounded_channel::<InboundDelivery>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        shutdown_tx.send(()).unwrap();
        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            consumer.run(&mut rx, &acker, &mut shutdown_rx),
        )
        .await
        .expect("consumer loop should observe shutdown");

        assert_eq!(summary.settled, 0);
        assert_eq!(summary.exit, ConsumerExit::Shutdown);
        assert!(acker.settled.lock().await.is_empty());
    }

    /// Fails the first ack, then behaves
    #[derive(Default)]
    struct FlakyAcker {
        acks: std::sync::atomic::AtomicU64,
        acked: tokio::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Acknowledger for FlakyAcker {
        async fn ack(&self, delivery_tag: u64) -> Result<()> {
            if self.acks.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                return Err(LobbyHubError::AmqpConnectionFailed {
                    message: format!("ack {} failed", delivery_tag),
                }
                .into());
            }
            self.acked.lock().await.push(delivery_tag);
            Ok(())
        }

        async fn requeue(&self, _delivery_tag: u64) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_ack_does_not_stop_consumption() {
        let handler = Arc::new(RecordingCommandHandler::new());
        let consumer = CommandConsumer::new(handler.clone(), "test.commands");
        let acker = FlakyAcker::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        for tag in 1..=3 {
            let (bytes, _, _) = player_queued_bytes("owner-1", "tenant-1");
            tx.send(InboundDelivery {
                delivery_tag: tag,
                redelivered: false,
                content: bytes,
            })
            .unwrap();
        }
        drop(tx);

        let summary = consumer.run(&mut rx, &acker, &mut shutdown_rx).await;

        assert_eq!(handler.call_count().await, 3);
        assert_eq!(summary.settled, 2);
        assert_eq!(summary.settle_failures, 1);
        assert_eq!(summary.exit, ConsumerExit::StreamClosed);
        assert_eq!(*acker.acked.lock().await, vec![2, 3]);
    }
}
