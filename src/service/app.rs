//! Main application state and service coordination
//!
//! Wires the lobby store, the lobby manager and the command consumer to the
//! broker, and owns the background tasks: health server, command consumer,
//! TTL monitor and stats refresh. All tasks stop on one broadcast signal.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{open_command_stream, CommandConsumer, ConsumerExit, RunSummary};
use crate::config::AppConfig;
use crate::lobby::indexes::lobby_indexes;
use crate::lobby::manager::LobbyManager;
use crate::lobby::provider::StaticGameRulesProvider;
use crate::lobby::repository::LobbyRepository;
use crate::lobby::store::{InMemoryLobbyStore, LobbyStoreConfig};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::utils::current_timestamp;
use amqprs::channel::{Channel, ConsumerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    store: Arc<InMemoryLobbyStore>,

    lobby_manager: Arc<LobbyManager>,

    amqp_connection: Arc<AmqpConnection>,

    /// Metrics collector plus the HTTP health server
    metrics_service: Arc<MetricsService>,

    background_tasks: Vec<JoinHandle<()>>,

    /// Fan-out stop signal for every background task
    shutdown_tx: broadcast::Sender<()>,

    is_running: Arc<RwLock<bool>>,

    /// Set while the command consumer holds a live delivery stream
    consumer_active: Arc<AtomicBool>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!(
            service = %config.service.name,
            queue = %config.amqp.queue_name,
            "Initializing lobby service"
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Self::initialize_store(&config, metrics_collector.clone()).await?;
        let lobby_manager =
            Self::initialize_lobby_manager(&config, store.clone(), metrics_collector.clone())?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let is_running = Arc::new(RwLock::new(false));
        let consumer_active = Arc::new(AtomicBool::new(false));
        let context = HealthContext::new(
            config.service.name.clone(),
            is_running.clone(),
            store.clone() as Arc<dyn LobbyRepository>,
        )
        .with_amqp(amqp_connection.clone())
        .with_consumer(consumer_active.clone());

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone(), context)
                .with_lobby_manager(lobby_manager.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            store,
            lobby_manager,
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            shutdown_tx,
            is_running,
            consumer_active,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting lobby service");

        *self.is_running.write().await = true;

        self.start_metrics_service();
        self.start_command_consumer().await?;
        self.start_ttl_monitor();
        self.start_stats_refresh();

        info!(
            tasks = self.background_tasks.len(),
            "Lobby service started"
        );
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of lobby service");

        *self.is_running.write().await = false;

        // Tasks may already be gone; a send error only means nobody listens
        let _ = self.shutdown_tx.send(());

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.amqp_connection.close().await {
            warn!("Failed to close AMQP connection: {}", e);
        }

        info!(
            manager = ?self.lobby_manager.get_stats(),
            "Lobby service shutdown completed"
        );
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn store(&self) -> Arc<InMemoryLobbyStore> {
        self.store.clone()
    }

    pub fn lobby_manager(&self) -> Arc<LobbyManager> {
        self.lobby_manager.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    /// Context used by health checks outside the HTTP server
    pub fn health_context(&self) -> HealthContext {
        HealthContext::new(
            self.config.service.name.clone(),
            self.is_running.clone(),
            self.store.clone() as Arc<dyn LobbyRepository>,
        )
        .with_amqp(self.amqp_connection.clone())
        .with_consumer(self.consumer_active.clone())
    }

    /// Build the store and its secondary indexes. Index failures are logged
    /// and counted; the store still answers every query without them.
    async fn initialize_store(
        config: &AppConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Arc<InMemoryLobbyStore>, ServiceError> {
        let store_config = LobbyStoreConfig {
            default_lobby_ttl: config.default_lobby_ttl(),
            featured_limit: config.store.featured_limit,
        };
        let store = InMemoryLobbyStore::new(store_config).with_metrics(metrics);

        store.ensure_indexes(&lobby_indexes()).await;

        Ok(Arc::new(store))
    }

    fn initialize_lobby_manager(
        config: &AppConfig,
        store: Arc<InMemoryLobbyStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Arc<LobbyManager>, ServiceError> {
        let mut rules =
            StaticGameRulesProvider::with_defaults(config.matchmaking.default_rules.clone())
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Invalid default game rules: {}", e),
                })?;

        for (game_id, game_rules) in &config.matchmaking.games {
            rules
                .set_rules(game_id.clone(), game_rules.clone())
                .map_err(|e| ServiceError::Configuration {
                    message: format!("Invalid rules for game {}: {}", game_id, e),
                })?;
        }

        let manager = LobbyManager::new(store, Arc::new(rules)).with_metrics(metrics);
        Ok(Arc::new(manager))
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config = AmqpConfig::from_url(&config.amqp.url)
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?
            .with_retries(config.amqp.max_retry_attempts, config.amqp.retry_delay_ms);

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        info!(
            port = self.config.service.health_port,
            "Health endpoints started"
        );
    }

    /// Open a channel on the shared connection and subscribe to the command queue
    async fn open_consumer(
        connection: &AmqpConnection,
        queue_name: &str,
        prefetch_count: u16,
    ) -> Result<(Channel, mpsc::UnboundedReceiver<ConsumerMessage>), ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let (_consumer_tag, deliveries) = open_command_stream(&channel, queue_name, prefetch_count)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming {}: {}", queue_name, e),
            })?;

        Ok((channel, deliveries))
    }

    /// Consume until shutdown. When the delivery stream dies underneath the
    /// loop, the consumer is reported unhealthy and resubscribes after the
    /// AMQP retry delay.
    async fn start_command_consumer(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.queue_name.clone();
        let prefetch_count = self.config.amqp.prefetch_count;
        let retry_delay = self.config.amqp_retry_delay();

        let first_stream =
            Self::open_consumer(&self.amqp_connection, &queue_name, prefetch_count).await?;
        self.consumer_active.store(true, Ordering::SeqCst);

        let consumer = CommandConsumer::new(self.lobby_manager.clone(), queue_name)
            .with_metrics(self.metrics_service.collector())
            .with_redelivery_delay(self.config.redelivery_delay());
        let connection = self.amqp_connection.clone();
        let active = self.consumer_active.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut stream = Some(first_stream);

            loop {
                let (channel, mut deliveries) = match stream.take() {
                    Some(opened) => opened,
                    None => {
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                        match Self::open_consumer(&connection, consumer.queue_name(), prefetch_count)
                            .await
                        {
                            Ok(opened) => {
                                info!(
                                    queue = %consumer.queue_name(),
                                    "Command consumer resubscribed"
                                );
                                active.store(true, Ordering::SeqCst);
                                opened
                            }
                            Err(e) => {
                                warn!(error = %e, "Command consumer could not resubscribe");
                                continue;
                            }
                        }
                    }
                };

                let summary = consumer.run(&mut deliveries, &channel, &mut shutdown).await;
                match check_consumer_exit(consumer.queue_name(), &summary) {
                    Ok(()) => break,
                    Err(e) => {
                        active.store(false, Ordering::SeqCst);
                        error!(
                            error = %e,
                            retry_in_ms = retry_delay.as_millis() as u64,
                            "Command consumer interrupted"
                        );
                    }
                }
            }

            active.store(false, Ordering::SeqCst);
            info!("Command consumer task finished");
        });
        self.background_tasks.push(handle);
        Ok(())
    }

    /// Periodically delete lobbies whose expiry has passed
    fn start_ttl_monitor(&mut self) {
        let store = self.store.clone();
        let period = self.config.ttl_monitor_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            info!(interval_s = period.as_secs(), "TTL monitor started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        match store.remove_expired(current_timestamp()).await {
                            Ok(0) => debug!("TTL sweep found no expired lobbies"),
                            Ok(removed) => info!(removed, "Removed expired lobbies"),
                            Err(e) => warn!(error = %e, "TTL sweep failed"),
                        }
                    }
                }
            }

            info!("TTL monitor stopped");
        });
        self.background_tasks.push(handle);
    }

    /// Refresh lobby gauges, uptime and health status
    fn start_stats_refresh(&mut self) {
        let collector = self.metrics_service.collector();
        let context = self.health_context();
        let period = self.config.stats_refresh_interval();
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let started_at = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        collector.set_uptime(started_at.elapsed());

                        match HealthCheck::check(&context).await {
                            Ok(health) => {
                                collector.update_health_status(health.status.as_gauge());
                                for check in &health.checks {
                                    collector.update_component_health(
                                        &check.name,
                                        check.status != HealthStatus::Unhealthy,
                                    );
                                }
                                if let Some(stats) = &health.lobbies {
                                    collector.update_from_lobby_stats(stats);
                                    debug!(
                                        open_lobbies = stats.total_active_lobbies,
                                        players_waiting = stats.total_players_waiting,
                                        status = %health.status,
                                        "Refreshed lobby metrics"
                                    );
                                }
                            }
                            Err(e) => warn!(error = %e, "Stats refresh failed"),
                        }
                    }
                }
            }

            info!("Stats refresh task stopped");
        });
        self.background_tasks.push(handle);
    }

    /// Wait for tasks to drain within the shutdown timeout, then abort stragglers
    async fn stop_background_tasks(&mut self) {
        let deadline = Instant::now() + self.config.shutdown_timeout();
        let tasks = std::mem::take(&mut self.background_tasks);
        info!(count = tasks.len(), "Stopping background tasks");

        for mut task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining.max(Duration::from_millis(1)), &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!("Background task failed: {}", e),
                Err(_) => {
                    warn!("Background task did not stop in time, aborting");
                    task.abort();
                }
            }
        }
    }
}

/// Only a shutdown is a clean end for the receive loop
fn check_consumer_exit(queue_name: &str, summary: &RunSummary) -> Result<(), ServiceError> {
    match summary.exit {
        ConsumerExit::Shutdown => Ok(()),
        ConsumerExit::StreamClosed => Err(ServiceError::BackgroundTask {
            message: format!(
                "command consumer on {} lost its delivery stream after {} deliveries",
                queue_name, summary.settled
            ),
        }),
    }
}
