//! Health checks for the lobby service
//!
//! Liveness only asks whether the service loop is running. Readiness also
//! requires a reachable lobby store, an open broker connection and a command
//! consumer that is still receiving.

use crate::amqp::connection::AmqpConnection;
use crate::lobby::repository::LobbyRepository;
use crate::lobby::stats::LobbyStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Combine two statuses, keeping the worse one
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Everything a health check needs to look at, shared with the HTTP server
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub is_running: Arc<RwLock<bool>>,
    pub store: Arc<dyn LobbyRepository>,
    /// None when the service runs without a broker
    pub amqp: Option<Arc<AmqpConnection>>,
    /// Cleared by the consumer task while it has no live delivery stream
    pub consumer_active: Option<Arc<AtomicBool>>,
}

impl HealthContext {
    pub fn new(
        service_name: impl Into<String>,
        is_running: Arc<RwLock<bool>>,
        store: Arc<dyn LobbyRepository>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            is_running,
            store,
            amqp: None,
            consumer_active: None,
        }
    }

    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp = Some(connection);
        self
    }

    pub fn with_consumer(mut self, active: Arc<AtomicBool>) -> Self {
        self.consumer_active = Some(active);
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Open-lobby snapshot, absent when the store could not be read
    pub lobbies: Option<LobbyStats>,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let service_check = Self::check_service_running(context).await;
        let (store_check, lobbies) = Self::check_store(context).await;
        let amqp_check = Self::check_amqp(context);

        let mut checks = vec![service_check, store_check, amqp_check];
        checks.extend(Self::check_consumer(context));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(check.status));

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            lobbies,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can take commands and queries
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let (store_check, _) = Self::check_store(context).await;
        let mut status = store_check.status.worst(Self::check_amqp(context).status);
        if let Some(consumer) = Self::check_consumer(context) {
            status = status.worst(consumer.status);
        }
        Ok(status)
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if context.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A stats query exercises the whole read path of the store
    async fn check_store(context: &HealthContext) -> (ComponentCheck, Option<LobbyStats>) {
        let start = std::time::Instant::now();

        let (status, message, stats) = match context.store.get_stats(None).await {
            Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
            Err(e) => {
                debug!("Lobby store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()), None)
            }
        };

        let check = ComponentCheck {
            name: "lobby_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    fn check_amqp(context: &HealthContext) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match &context.amqp {
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No AMQP connection configured".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Absent when no consumer task reports into the context
    fn check_consumer(context: &HealthContext) -> Option<ComponentCheck> {
        let active = context.consumer_active.as_ref()?;

        let (status, message) = if active.load(Ordering::SeqCst) {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Command consumer has no delivery stream".to_string()),
            )
        };

        Some(ComponentCheck {
            name: "command_consumer".to_string(),
            status,
            message,
            duration_ms: 0,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
