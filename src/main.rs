mod api;
mod config;
mod control;
mod dashboard;
mod db;
mod normalize;
mod report;
mod session;
mod state;
mod store;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use api::AppState;
use db::Db;
use session::SessionStore;
use state::SystemState;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ─────────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config file (devices + operator accounts) ───────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Database ────────────────────────────────────────────────────
    // A dead database must not take the feeder down with it: the server
    // still answers device polls with defaults and lets operators sign
    // in to see what is wrong. Readings are counted as dropped until
    // the store comes back with a restart.
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:fishfeeder.db?mode=rwc".to_string());
    let db = match Db::connect(&db_url).await {
        Ok(db) => match db.migrate().await {
            Ok(()) => Some(db),
            Err(e) => {
                warn!("migrations failed: {e:#}; continuing without the store");
                None
            }
        },
        Err(e) => {
            warn!("store connect failed: {e:#}; continuing without the store");
            None
        }
    };
    let store = Store::new(db);

    if store.available() {
        info!("store ready at {db_url}");
    } else {
        warn!("running without a store; incoming readings will be dropped");
    }

    // ── Shared state (ephemeral, for the dashboard) ─────────────────
    let mut st = SystemState::new();
    st.store_online = store.available();
    st.record_system("server started".to_string());
    let state = Arc::new(RwLock::new(st));

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        sessions: SessionStore::new(cfg.auth.session_ttl_minutes),
        config: Arc::new(cfg),
        store,
        state,
    };

    api::serve(app).await
}
