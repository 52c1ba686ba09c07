//! HTTP surface. Two very different clients share this router:
//!
//!   devices   ESP32 firmware posting readings and polling for control
//!             state; always answered 200 (see `device`)
//!   operators browsers and scripts behind cookie sessions; strict
//!             status codes and JSON errors (see `operator`)

pub mod device;
pub mod error;
pub mod operator;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::Uri;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::control::{Actuator, ActuatorStatus};
use crate::session::SessionStore;
use crate::state::SharedState;
use crate::store::Store;

/// Shared application context threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub state: SharedState,
    pub sessions: SessionStore,
}

// ---------------------------------------------------------------------------
// Request plumbing shared by both handler families
// ---------------------------------------------------------------------------

/// Pull one query parameter out of the raw request URI. Device ids are
/// plain ASCII so no percent-decoding is attempted.
pub(crate) fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

/// Device id from a JSON payload, falling back to the configured primary.
pub(crate) fn payload_device_id(payload: &Value, config: &Config) -> String {
    payload
        .get("device_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(config.devices.primary.as_str())
        .to_string()
}

/// Response body for an actuator state, keyed `feeder_*` or `motor_*`
/// to match what the firmware parses.
pub(crate) fn actuator_body(
    which: Actuator,
    device_id: &str,
    status: ActuatorStatus,
    speed: i64,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("device_id".into(), Value::String(device_id.to_string()));
    body.insert(format!("{}_status", which.as_str()), json!(status));
    body.insert(format!("{}_speed", which.as_str()), json!(speed));
    body
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        // operator pages
        .route("/", get(operator::index))
        .route("/login", get(operator::login_page).post(operator::login))
        .route("/logout", get(operator::logout))
        .route("/dashboard", get(operator::dashboard_page))
        // operator api
        .route("/ping", get(operator::ping))
        .route("/api/summary", get(operator::api_summary))
        .route("/api/history", get(operator::api_history))
        .route("/controlfeeder", post(operator::control_feeder))
        .route("/controlmotor", post(operator::control_motor))
        .route("/getschedule", get(operator::get_schedule))
        .route("/setschedule", post(operator::set_schedule))
        .route("/exportpdf", get(operator::export_pdf))
        // device endpoints
        .route("/addreading", post(device::add_reading))
        .route("/getfeedingstatus", get(device::get_feeding_status))
        .route("/getmotorstatus", get(device::get_motor_status))
        .route("/devicecommands/{device_id}", get(device::device_commands))
        .with_state(app)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on http://{addr}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("web server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

// ===========================================================================
// Tests
// ===========================================================================
