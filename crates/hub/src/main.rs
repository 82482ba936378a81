mod config;
mod db;
mod error;
mod images;
mod state;
mod web;

use std::env;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::Db;
use images::ImageStore;
use state::TelemetryState;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;

    if let Some(port) = env::var("HTTP_PORT").ok().and_then(|s| s.parse().ok()) {
        cfg.http_port = port;
    }
    if let Ok(url) = env::var("DB_URL") {
        cfg.db_url = url;
    }
    if let Ok(dir) = env::var("IMAGE_DIR") {
        cfg.image_dir = dir;
    }

    // ── Storage ─────────────────────────────────────────────────────
    // Strictly sequential: schema creation and the default-phase seed
    // must both complete before any handler is reachable.
    let db = Db::connect(&cfg.db_url).await?;
    db.init_schema().await?;
    db.seed_default_phase(&Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
        .await?;

    let images = Arc::new(ImageStore::open(&cfg.image_dir)?);

    // ── Shared telemetry state (ephemeral) ──────────────────────────
    let telemetry = Arc::new(RwLock::new(TelemetryState::new()));

    info!(
        db_url = %cfg.db_url,
        image_dir = %cfg.image_dir,
        "hub ready"
    );

    // ── HTTP server ─────────────────────────────────────────────────
    web::serve(
        AppState {
            db,
            images,
            telemetry,
        },
        cfg.http_port,
    )
    .await
}
