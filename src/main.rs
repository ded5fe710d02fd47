mod api;
mod clock;
mod config;
mod error;
mod gate;
mod notify;
mod orchestrator;
mod params;
mod scorer;
mod scraper;
mod store;
mod subscribers;
mod tuner;
mod types;

use std::sync::Arc;

use sqlx::sqlite::{SqlitePoolOptions, SqliteConnectOptions};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::Result;
use crate::notify::telegram::TelegramNotifier;
use crate::orchestrator::Orchestrator;
use crate::params::ParamStore;
use crate::scraper::HttpScraper;
use crate::store::Store;
use crate::subscribers::SqliteSubscriberRegistry;
use crate::tuner::AutoTuner;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    let store = Store::new(pool.clone());
    let params = ParamStore::new(pool.clone());
    let clock: Arc<dyn clock::Clock> = Arc::new(SystemClock);
    let health = Arc::new(HealthState::new());

    // --- Shutdown fan-out ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    // --- Background tasks ---
    let tuner = AutoTuner::new(store.clone(), params.clone(), Arc::clone(&clock));
    let tuner_shutdown = shutdown_rx.clone();
    tokio::spawn(async move { tuner.run(tuner_shutdown).await });

    let orchestrator = Orchestrator::new(
        HttpScraper::new(cfg.newest_url.clone())?,
        Arc::new(TelegramNotifier::new(&cfg.telegram_bot_token)?),
        SqliteSubscriberRegistry::new(pool.clone()),
        store.clone(),
        params,
        Arc::clone(&clock),
        Arc::clone(&health),
        &cfg,
        shutdown_rx.clone(),
    );
    let orchestrator_handle = tokio::spawn(async move { orchestrator.run().await });

    // --- HTTP API server ---
    let api_state = ApiState { store, health };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let mut serve_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await?;

    // Let the in-flight cycle finish before the process exits.
    let _ = orchestrator_handle.await;
    info!("promoradar stopped cleanly");

    Ok(())
}
