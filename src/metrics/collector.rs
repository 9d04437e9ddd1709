//! Metrics collection using Prometheus
//!
//! Covers the command consumer (messages by disposition, skip reasons,
//! handler latency) and the lobby store (size, TTL removals, index failures,
//! open-lobby aggregates).

use crate::lobby::stats::LobbyStats;
use anyhow::Result;
use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    service_metrics: ServiceMetrics,

    consumer_metrics: ConsumerMetrics,

    store_metrics: StoreMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Command consumer metrics
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Messages settled, by disposition (dispatched, skipped, requeued)
    pub messages_total: IntCounterVec,

    /// Skipped messages by reason
    pub skipped_total: IntCounterVec,

    /// Domain handler latency by event type
    pub handler_duration_seconds: HistogramVec,

    /// Queue command outcomes of the lobby manager
    pub queue_outcomes_total: IntCounterVec,
}

/// Lobby store metrics
#[derive(Clone)]
pub struct StoreMetrics {
    /// Lobbies currently stored, any status
    pub stored_lobbies: IntGauge,

    /// Lobbies removed by the TTL monitor
    pub ttl_removals_total: IntCounter,

    /// Index definitions that failed to build
    pub index_failures_total: IntCounter,

    /// Open lobbies at the last stats refresh
    pub open_lobbies: IntGauge,

    /// Players seated in open lobbies at the last stats refresh
    pub players_waiting: IntGauge,

    /// Average occupancy of open lobbies (0.0 to 1.0)
    pub average_occupancy: Gauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let consumer_metrics = ConsumerMetrics::new(&registry)?;
        let store_metrics = StoreMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            consumer_metrics,
            store_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn consumer(&self) -> &ConsumerMetrics {
        &self.consumer_metrics
    }

    pub fn store(&self) -> &StoreMetrics {
        &self.store_metrics
    }

    /// Record a settled message by disposition label
    pub fn record_message(&self, disposition: &str) {
        self.consumer_metrics
            .messages_total
            .with_label_values(&[disposition])
            .inc();
    }

    /// Record the reason a message was skipped
    pub fn record_skip(&self, reason: &str) {
        self.consumer_metrics
            .skipped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn observe_handler_duration(&self, event_type: &str, duration: Duration) {
        self.consumer_metrics
            .handler_duration_seconds
            .with_label_values(&[event_type])
            .observe(duration.as_secs_f64());
    }

    pub fn record_queue_outcome(&self, outcome: &str) {
        self.consumer_metrics
            .queue_outcomes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_stored_lobbies(&self, count: usize) {
        self.store_metrics.stored_lobbies.set(count as i64);
    }

    pub fn record_ttl_removals(&self, removed: usize) {
        self.store_metrics.ttl_removals_total.inc_by(removed as u64);
    }

    pub fn record_index_failures(&self, failed: usize) {
        self.store_metrics.index_failures_total.inc_by(failed as u64);
    }

    /// Update gauges from a fresh stats snapshot
    pub fn update_from_lobby_stats(&self, stats: &LobbyStats) {
        self.store_metrics
            .open_lobbies
            .set(stats.total_active_lobbies as i64);
        self.store_metrics
            .players_waiting
            .set(stats.total_players_waiting as i64);
        self.store_metrics
            .average_occupancy
            .set(stats.average_occupancy);
    }

    pub fn set_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("lobby_hub_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "lobby_hub_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("lobby_hub_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl ConsumerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let messages_total = IntCounterVec::new(
            Opts::new(
                "lobby_hub_command_messages_total",
                "Command messages settled by disposition",
            ),
            &["disposition"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let skipped_total = IntCounterVec::new(
            Opts::new(
                "lobby_hub_command_skipped_total",
                "Command messages skipped by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(skipped_total.clone()))?;

        let handler_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lobby_hub_handler_duration_seconds",
                "Command handler duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(handler_duration_seconds.clone()))?;

        let queue_outcomes_total = IntCounterVec::new(
            Opts::new(
                "lobby_hub_queue_outcomes_total",
                "Queue commands by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(queue_outcomes_total.clone()))?;

        Ok(Self {
            messages_total,
            skipped_total,
            handler_duration_seconds,
            queue_outcomes_total,
        })
    }
}

impl StoreMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let stored_lobbies = IntGauge::new("lobby_hub_stored_lobbies", "Lobbies currently stored")?;
        registry.register(Box::new(stored_lobbies.clone()))?;

        let ttl_removals_total = IntCounter::new(
            "lobby_hub_ttl_removals_total",
            "Lobbies removed after expiry",
        )?;
        registry.register(Box::new(ttl_removals_total.clone()))?;

        let index_failures_total = IntCounter::new(
            "lobby_hub_index_failures_total",
            "Index definitions that failed to build",
        )?;
        registry.register(Box::new(index_failures_total.clone()))?;

        let open_lobbies = IntGauge::new("lobby_hub_open_lobbies", "Open lobbies")?;
        registry.register(Box::new(open_lobbies.clone()))?;

        let players_waiting = IntGauge::new(
            "lobby_hub_players_waiting",
            "Players seated in open lobbies",
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let average_occupancy = Gauge::new(
            "lobby_hub_average_occupancy",
            "Average occupancy of open lobbies",
        )?;
        registry.register(Box::new(average_occupancy.clone()))?;

        Ok(Self {
            stored_lobbies,
            ttl_removals_total,
            index_failures_total,
            open_lobbies,
            players_waiting,
            average_occupancy,
        })
    }
}
