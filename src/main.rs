//! Main entry point for the Lobby Hub service
//!
//! Loads configuration, initializes logging, runs the command consumer and
//! lobby store with their background tasks, and shuts down on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use lobby_hub::config::{validate_config, AppConfig};
use lobby_hub::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Lobby Hub - lobby command ingestion and lobby discovery service
#[derive(Parser)]
#[command(
    name = "lobby-hub",
    version,
    about = "Consumes lobby commands over AMQP and serves lobby search and stats",
    long_about = "Lobby Hub consumes player commands from a durable AMQP queue, validates \
                 envelope ownership, seats players into matchmaking lobbies and keeps an \
                 indexed lobby store with TTL expiry, search ranking and featured listings."
)]
struct Args {
    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Connect once, print the health report as JSON and exit non-zero when unhealthy
    #[arg(long)]
    health_check: bool,

    /// Tracing filter, e.g. `info` or `lobby_hub=debug`
    #[arg(short, long, value_name = "FILTER")]
    log_level: Option<String>,

    /// Broker URL, replaces `amqp.url`
    #[arg(long, value_name = "URL")]
    amqp_url: Option<String>,

    /// Command queue, replaces `amqp.queue_name`
    #[arg(long, value_name = "QUEUE")]
    queue: Option<String>,

    /// Port for `/health`, `/metrics` and `/stats`
    #[arg(long, value_name = "PORT")]
    health_port: Option<u16>,

    /// Shorthand for `--log-level debug`
    #[arg(short, long)]
    debug: bool,

    /// Load and validate configuration, then exit
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {}", e))
}

/// Connect, run one full health check and report it as the exit status
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let mut app_state = AppState::new(config).await?;
    app_state.start().await?;
    let health = HealthCheck::check(&app_state.health_context()).await;
    app_state.shutdown().await?;

    match health {
        Ok(health) => {
            println!("{}", health.to_json()?);
            if health.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Lobby Hub {}", lobby_hub::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Command queue: {}", config.amqp.queue_name);
    info!(
        "   Lobby TTL: {}s (sweep every {}s)",
        config.store.default_lobby_ttl_seconds, config.store.ttl_monitor_interval_seconds
    );
    info!(
        "   Game rules: defaults + {} per-game overrides",
        config.matchmaking.games.len()
    );
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(queue) = &args.queue {
        config.amqp.queue_name = queue.clone();
    }

    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("lobby-hub: invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("lobby-hub: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    display_startup_banner(&config);
    if args.dry_run {
        info!("Configuration valid, exiting (dry run)");
        return Ok(());
    }

    let mut app_state = AppState::new(config).await.map_err(|e| {
        error!(error = %e, "Initialization failed");
        e
    })?;

    if let Err(start_err) = app_state.start().await {
        error!(error = %start_err, "Service start failed");
        if let Err(e) = app_state.shutdown().await {
            warn!(error = %e, "Cleanup after failed start also failed");
        }
        return Err(start_err.into());
    }

    info!("Lobby Hub is running, press Ctrl+C to stop");
    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, draining");
    app_state.shutdown().await?;

    info!("Lobby Hub stopped");
    Ok(())
}
