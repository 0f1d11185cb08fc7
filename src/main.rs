use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod config;
mod db;
mod dispatch;
mod error;
mod leagues;
mod monitor;
mod registry;
mod scheduler;
mod server;

use config::Config;
use db::Database;
use dispatch::{
    Broadcaster, ChannelBroadcaster, FanoutBroadcaster, GoalDispatcher, WebhookBroadcaster,
};
use leagues::{LeagueService, LeagueServices, MlbService, NhlService};
use monitor::Monitor;
use registry::{ActiveGameRegistry, MemoryRegistry, SqliteRegistry};
use scheduler::Scheduler;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Goal history
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    // Active game registry
    let registry: Arc<dyn ActiveGameRegistry> = match &config.registry_path {
        Some(path) => {
            info!("Registry backed by {}", path);
            Arc::new(SqliteRegistry::open(path, config.registry_ttl())?)
        }
        None => {
            info!("Registry held in memory");
            Arc::new(MemoryRegistry::new(config.registry_ttl()))
        }
    };

    // League services
    let mut league_services: Vec<Arc<dyn LeagueService>> = Vec::new();
    if config.league_enabled("nhl") {
        league_services.push(Arc::new(NhlService::new(
            Some(config.nhl_api_url.as_str()),
            config.provider_timeout(),
        )?));
    }
    if config.league_enabled("mlb") {
        league_services.push(Arc::new(MlbService::new(
            Some(config.mlb_api_url.as_str()),
            config.provider_timeout(),
        )?));
    }
    let services = LeagueServices::new(league_services);
    info!("Monitoring {} league(s)", services.len());

    // Event fan-out: subscriber sockets first, webhook when configured
    let channel = ChannelBroadcaster::new(config.subscriber_buffer);
    let mut targets: Vec<Arc<dyn Broadcaster>> =
        vec![Arc::new(channel.clone()) as Arc<dyn Broadcaster>];
    if let Some(url) = &config.webhook_url {
        targets.push(Arc::new(WebhookBroadcaster::new(url, config.provider_timeout())?));
        info!("Webhook delivery enabled: {}", url);
    }
    let dispatcher = GoalDispatcher::new(
        Arc::new(FanoutBroadcaster::new(targets)),
        Arc::new(db.clone()),
    );

    let monitor = Arc::new(Monitor::new(
        services,
        registry.clone(),
        dispatcher,
        config.monitor_limits(),
    ));

    let admitted = monitor.check_leagues_for_active_games().await;
    info!("Initial discovery admitted {} game(s)", admitted);

    let mut scheduler = Scheduler::new()
        .every(
            "discover",
            Duration::from_secs(config.discovery_interval_secs),
            {
                let monitor = monitor.clone();
                move || {
                    let monitor = monitor.clone();
                    async move {
                        monitor.check_leagues_for_active_games().await;
                    }
                }
            },
        )
        .every(
            "watch",
            Duration::from_secs(config.watch_interval_secs),
            {
                let monitor = monitor.clone();
                move || {
                    let monitor = monitor.clone();
                    async move {
                        monitor.watch_active_games().await;
                    }
                }
            },
        )
        .every(
            "refresh",
            Duration::from_secs(config.refresh_interval_secs),
            {
                let monitor = monitor.clone();
                move || {
                    let monitor = monitor.clone();
                    async move {
                        monitor.run_pending_refresh().await;
                    }
                }
            },
        );
    if !config.disable_test_goal {
        let monitor = monitor.clone();
        scheduler = scheduler.every(
            "test-goal",
            Duration::from_secs(config.test_goal_interval_secs),
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.send_test_goal().await;
                }
            },
        );
    }
    let handle = scheduler.start();

    // Subscriber socket + read-only API
    let app = server::router(AppState {
        db,
        registry,
        events: channel,
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        })
        .await?;

    handle.shutdown();
    info!("Scheduler stopped");
    Ok(())
}
