//! Command message definitions and serialization
//!
//! Every message on the command queue is a JSON object holding an
//! [`EventEnvelope`] and an event payload. The envelope's `type` selects the
//! payload variant of [`CommandEvent`].

use crate::amqp::ownership::OwnershipError;
use crate::error::{LobbyHubError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue carrying inbound lobby commands
pub const COMMAND_QUEUE: &str = "lobby.commands";

/// Envelope spec version stamped on locally produced events
pub const ENVELOPE_SPEC_VERSION: &str = "1.0";

/// Versioned metadata carried by every inbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub spec_version: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub subject: String,
    /// Tenant-scoping identifier; absent decodes as empty and fails ownership validation
    #[serde(default)]
    pub resource_owner_id: String,
    /// Incremented on breaking payload changes
    #[serde(default)]
    pub data_schema_version: u32,
}

impl EventEnvelope {
    /// Create an envelope with a fresh id and the current time
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        subject: impl Into<String>,
        resource_owner_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.as_str().to_string(),
            source: source.into(),
            spec_version: ENVELOPE_SPEC_VERSION.to_string(),
            time: Utc::now(),
            subject: subject.into(),
            resource_owner_id: resource_owner_id.into(),
            data_schema_version: 1,
        }
    }
}

/// Payload of a `PlayerQueued` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerQueuedPayload {
    #[serde(default)]
    pub player_id: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
}

/// Closed set of event types known to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PlayerQueued,
}

impl EventType {
    /// Resolve a dispatch tag; unknown tags yield `None`
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "PlayerQueued" => Some(EventType::PlayerQueued),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PlayerQueued => "PlayerQueued",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of a command message. A null or missing envelope is kept as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage<P = serde_json::Value> {
    #[serde(default)]
    pub envelope: Option<EventEnvelope>,
    #[serde(default)]
    pub payload: P,
}

impl CommandMessage {
    /// Decode the outer message, leaving the payload untyped
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl<P: Serialize> CommandMessage<P> {
    pub fn new(envelope: EventEnvelope, payload: P) -> Self {
        Self {
            envelope: Some(envelope),
            payload,
        }
    }

    /// Serialize the message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LobbyHubError::InternalError {
                message: format!("Failed to serialize command message: {}", e),
            }
            .into()
        })
    }
}

/// A decoded, typed inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    PlayerQueued {
        envelope: EventEnvelope,
        payload: PlayerQueuedPayload,
    },
}

impl CommandEvent {
    /// Decode the payload variant selected by `event_type`
    pub fn from_parts(
        event_type: EventType,
        envelope: EventEnvelope,
        payload: serde_json::Value,
    ) -> std::result::Result<Self, SkipReason> {
        match event_type {
            EventType::PlayerQueued => {
                let payload = serde_json::from_value(payload).map_err(|e| SkipReason::Malformed {
                    reason: format!("Invalid {} payload: {}", event_type, e),
                })?;
                Ok(CommandEvent::PlayerQueued { envelope, payload })
            }
        }
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            CommandEvent::PlayerQueued { envelope, .. } => envelope,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            CommandEvent::PlayerQueued { .. } => EventType::PlayerQueued,
        }
    }
}

/// Why a message was classified as permanently unprocessable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("Malformed message: {reason}")]
    Malformed { reason: String },

    #[error("Message has no envelope")]
    MissingEnvelope,

    #[error("Unknown event type: '{event_type}'")]
    UnknownEventType { event_type: String },

    #[error(transparent)]
    OwnershipInvalid(#[from] OwnershipError),
}

impl SkipReason {
    /// Stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Malformed { .. } => "malformed",
            SkipReason::MissingEnvelope => "missing_envelope",
            SkipReason::UnknownEventType { .. } => "unknown_event_type",
            SkipReason::OwnershipInvalid(_) => "ownership_invalid",
        }
    }
}
