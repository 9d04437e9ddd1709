//! AMQP publisher for lobby command messages
//!
//! Used by upstream producers and the `lobby-publisher` tool to put command
//! messages on the command queue.

use crate::amqp::messages::{CommandMessage, EventEnvelope, EventType, PlayerQueuedPayload};
use crate::error::{LobbyHubError, Result};
use amqprs::{
    channel::{BasicPublishArguments, Channel, QueueDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Trait for putting raw command messages on a queue
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Publish pre-encoded message bytes with the given message id
    async fn publish_raw(&self, message_id: &str, body: Vec<u8>) -> Result<()>;

    /// Publish a `PlayerQueued` event
    async fn publish_player_queued(
        &self,
        envelope: EventEnvelope,
        payload: PlayerQueuedPayload,
    ) -> Result<()> {
        if envelope.event_type != EventType::PlayerQueued.as_str() {
            return Err(LobbyHubError::InvalidMessage {
                reason: format!(
                    "Envelope type '{}' does not match PlayerQueued payload",
                    envelope.event_type
                ),
            }
            .into());
        }
        let message_id = envelope.id.clone();
        let body = CommandMessage::new(envelope, payload).to_bytes()?;
        self.publish_raw(&message_id, body).await
    }
}

/// Configuration for command publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// Publishes to a durable queue through the default exchange
pub struct AmqpCommandPublisher {
    channel: Channel,
    queue_name: String,
    config: PublisherConfig,
}

impl AmqpCommandPublisher {
    /// Create a publisher and make sure the target queue exists
    pub async fn new(
        channel: Channel,
        queue_name: impl Into<String>,
        config: PublisherConfig,
    ) -> Result<Self> {
        let publisher = Self {
            channel,
            queue_name: queue_name.into(),
            config,
        };
        publisher.declare_queue().await?;
        Ok(publisher)
    }

    async fn declare_queue(&self) -> Result<()> {
        let args = QueueDeclareArguments::new(&self.queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel.queue_declare(args).await.map_err(|e| {
            LobbyHubError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", self.queue_name, e),
            }
        })?;
        Ok(())
    }

    /// Single publish attempt
    async fn try_publish(&self, message_id: &str, body: &[u8]) -> Result<()> {
        let args = BasicPublishArguments::new("", &self.queue_name);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(message_id)
            .with_timestamp(chrono::Utc::now().timestamp() as u64)
            .with_content_type("application/json")
            .with_delivery_mode(2);

        self.channel
            .basic_publish(properties, body.to_vec(), args)
            .await
            .map_err(|e| LobbyHubError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl CommandPublisher for AmqpCommandPublisher {
    async fn publish_raw(&self, message_id: &str, body: Vec<u8>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(message_id, &body).await {
                Ok(()) => {
                    debug!(
                        message_id,
                        queue = %self.queue_name,
                        "Published command message"
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            message_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, message_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }
}

/// In-memory publisher capturing message bodies
#[derive(Debug, Default)]
pub struct MockCommandPublisher {
    published: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockCommandPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all published (message id, body) pairs
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandPublisher for MockCommandPublisher {
    async fn publish_raw(&self, message_id: &str, body: Vec<u8>) -> Result<()> {
        if let Ok(mut published) = self.published.lock() {
            published.push((message_id.to_string(), body));
        }
        Ok(())
    }
}
