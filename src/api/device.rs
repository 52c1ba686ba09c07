//! Endpoints polled by the feeder firmware. These never return an error
//! status: the ESP32 HTTP client treats anything but a 200 as a reason
//! to retry in a tight loop, so failures are acked anyway and recorded
//! on the server side where an operator can see them.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::Uri;
use axum::response::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::control::Actuator;
use crate::db::ControlDoc;
use crate::normalize::{self, NewReading};
use crate::store::StoreError;

use super::{actuator_body, payload_device_id, query_param, AppState};

fn success() -> Json<Value> {
    Json(json!({ "status": "success" }))
}

// ---------------------------------------------------------------------------
// Telemetry ingest
// ---------------------------------------------------------------------------

fn reading_detail(device_id: &str, r: &NewReading) -> String {
    let mut parts = Vec::new();
    if let Some(v) = r.temperature {
        parts.push(format!("temp={v}"));
    }
    if let Some(v) = r.ph {
        parts.push(format!("ph={v}"));
    }
    if let Some(v) = r.ammonia {
        parts.push(format!("ammonia={v}"));
    }
    if let Some(v) = r.turbidity {
        parts.push(format!("turbidity={v}"));
    }
    if let Some(v) = r.distance {
        parts.push(format!("distance={v}"));
    }
    format!("{device_id}: {}", parts.join(" "))
}

/// `POST /addreading`: sensor ingest.
///
/// The body is whatever the firmware managed to serialize, so it is
/// parsed leniently: unreadable JSON becomes an empty reading, numeric
/// fields may arrive as strings, and unknown fields are ignored.
pub async fn add_reading(State(app): State<AppState>, body: Bytes) -> Json<Value> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let device_id = payload_device_id(&payload, &app.config);
    let reading = normalize::normalize(&payload);

    if reading.is_empty() {
        // Nothing usable in the payload. Still a sign of life.
        app.state.write().await.mark_seen(&device_id);
        return success();
    }

    match app.store.append_reading(&device_id, &reading).await {
        Ok(_) => {
            debug!(device = %device_id, "reading stored");
            app.state
                .write()
                .await
                .record_reading(&device_id, reading_detail(&device_id, &reading));
        }
        Err(e) => {
            warn!(device = %device_id, "reading dropped: {e}");
            app.state
                .write()
                .await
                .record_dropped_reading(&device_id, format!("{device_id}: reading dropped: {e}"));
        }
    }
    success()
}

// ---------------------------------------------------------------------------
// Control polling
// ---------------------------------------------------------------------------

/// Control state for a device, falling back to defaults when the store
/// cannot answer. An offline store answers every poll, so only real
/// backend failures are logged.
async fn control_or_default(app: &AppState, device_id: &str) -> ControlDoc {
    match app.store.get_control(device_id).await {
        Ok(doc) => doc,
        Err(e) => {
            if !matches!(e, StoreError::Unavailable) {
                warn!(device = %device_id, "control read failed: {e}");
            }
            ControlDoc::default_for(device_id)
        }
    }
}

async fn actuator_status(app: AppState, uri: Uri, which: Actuator) -> Json<Value> {
    let device_id =
        query_param(&uri, "device_id").unwrap_or_else(|| app.config.devices.primary.clone());
    let doc = control_or_default(&app, &device_id).await;
    let (status, speed) = match which {
        Actuator::Feeder => (doc.feeder_status, doc.feeder_speed),
        Actuator::Motor => (doc.motor_status, doc.motor_speed),
    };
    Json(Value::Object(actuator_body(which, &device_id, status, speed)))
}

/// `GET /getfeedingstatus[?device_id=X]`
pub async fn get_feeding_status(State(app): State<AppState>, uri: Uri) -> Json<Value> {
    actuator_status(app, uri, Actuator::Feeder).await
}

/// `GET /getmotorstatus[?device_id=X]`
pub async fn get_motor_status(State(app): State<AppState>, uri: Uri) -> Json<Value> {
    actuator_status(app, uri, Actuator::Motor).await
}

/// `GET /devicecommands/{device_id}`: one poll returning the device's
/// whole desired state. `server_time` lets the firmware align its clock
/// for scheduled feeds without NTP.
pub async fn device_commands(
    State(app): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<Value> {
    let doc = control_or_default(&app, &device_id).await;
    Json(json!({
        "device_id": doc.device_id,
        "feeder_status": doc.feeder_status,
        "feeder_speed": doc.feeder_speed,
        "motor_status": doc.motor_status,
        "motor_speed": doc.motor_speed,
        "schedule": doc.schedule,
        "server_time": Utc::now(),
    }))
}
