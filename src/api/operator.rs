//! Operator-facing pages and API. Everything here sits behind the
//! session cookie except the login flow and the liveness probe, and
//! anything that moves hardware or exports data needs the admin role.

use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Uri};
use axum::response::{AppendHeaders, IntoResponse, Json, Redirect, Response};
use axum::Form;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Role;
use crate::control::{self, Actuator};
use crate::dashboard;
use crate::db::{ControlPatch, FeedingSchedule};
use crate::report::{render_pdf, ReportMeta};
use crate::session::{self, Session};

use super::error::ApiError;
use super::{actuator_body, payload_device_id, query_param, AppState};

const LOGIN_HTML: &str = include_str!("../ui/login.html");
const DASHBOARD_HTML: &str = include_str!("../ui/dashboard.html");

// ---------------------------------------------------------------------------
// Session extraction
// ---------------------------------------------------------------------------

/// A signed-in operator, pulled from the session cookie.
pub struct Operator(pub Session);

impl Operator {
    fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        app: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session::cookie_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let session = app.sessions.get(&token).await.ok_or(ApiError::Unauthorized)?;
        Ok(Operator(session))
    }
}

async fn signed_in(app: &AppState, headers: &HeaderMap) -> bool {
    match session::cookie_token(headers) {
        Some(token) => app.sessions.get(&token).await.is_some(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Pages + login flow
// ---------------------------------------------------------------------------

pub async fn index(State(app): State<AppState>, headers: HeaderMap) -> Redirect {
    if signed_in(&app, &headers).await {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}

pub async fn login_page() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], LOGIN_HTML)
}

pub async fn dashboard_page(State(app): State<AppState>, headers: HeaderMap) -> Response {
    if signed_in(&app, &headers).await {
        (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            DASHBOARD_HTML,
        )
            .into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

/// `POST /login`: browser form login. A bad credential bounces back to
/// the form with a flag rather than a JSON error.
pub async fn login(State(app): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    match app.config.verify_operator(&form.email, &form.password) {
        Some(role) => {
            let session = app.sessions.create(&form.email, role).await;
            info!(email = %form.email, role = ?role, "operator signed in");
            (
                AppendHeaders([(
                    header::SET_COOKIE,
                    session::session_cookie(&session.token, app.sessions.ttl_seconds()),
                )]),
                Redirect::to("/dashboard"),
            )
                .into_response()
        }
        None => {
            info!(email = %form.email, "login rejected");
            Redirect::to("/login?error=1").into_response()
        }
    }
}

pub async fn logout(State(app): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session::cookie_token(&headers) {
        app.sessions.revoke(&token).await;
    }
    (
        AppendHeaders([(header::SET_COOKIE, session::clear_session_cookie())]),
        Redirect::to("/login"),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Actuator control
// ---------------------------------------------------------------------------

/// Shared by `/controlfeeder` and `/controlmotor`. Unlike the device
/// endpoints this path is strict: malformed input is a 400 and a store
/// failure surfaces instead of being masked.
async fn actuate(
    app: AppState,
    op: Operator,
    which: Actuator,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    op.require_admin()?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
    let device_id = payload_device_id(&payload, &app.config);
    let (status, speed) = control::resolve_command(&payload)?;

    let patch = match which {
        Actuator::Feeder => ControlPatch {
            feeder: Some((status, speed)),
            ..ControlPatch::default()
        },
        Actuator::Motor => ControlPatch {
            motor: Some((status, speed)),
            ..ControlPatch::default()
        },
    };
    app.store.merge_control(&device_id, &patch).await?;

    info!(
        device = %device_id,
        actuator = which.as_str(),
        status = status.as_str(),
        speed,
        "control applied"
    );
    app.state.write().await.record_control(format!(
        "{device_id}: {} -> {} {speed}%",
        which.as_str(),
        status.as_str()
    ));

    let mut body = actuator_body(which, &device_id, status, speed);
    body.insert("status".into(), Value::String("success".into()));
    Ok(Json(Value::Object(body)))
}

pub async fn control_feeder(
    State(app): State<AppState>,
    op: Operator,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    actuate(app, op, Actuator::Feeder, body).await
}

pub async fn control_motor(
    State(app): State<AppState>,
    op: Operator,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    actuate(app, op, Actuator::Motor, body).await
}

// ---------------------------------------------------------------------------
// Feeding schedule
// ---------------------------------------------------------------------------

/// `GET /getschedule[?device_id=X]`: any signed-in role.
pub async fn get_schedule(
    State(app): State<AppState>,
    _op: Operator,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let device_id =
        query_param(&uri, "device_id").unwrap_or_else(|| app.config.devices.primary.clone());
    let doc = app.store.get_control(&device_id).await?;
    Ok(Json(json!({
        "device_id": device_id,
        "schedule": doc.schedule,
    })))
}

fn apply_schedule_fields(
    mut s: FeedingSchedule,
    payload: &Value,
) -> Result<FeedingSchedule, ApiError> {
    if let Some(v) = payload.get("first_feed") {
        s.first_feed = v
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("first_feed must be a string"))?;
    }
    if let Some(v) = payload.get("second_feed") {
        s.second_feed = v
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("second_feed must be a string"))?;
    }
    if let Some(v) = payload.get("duration_seconds") {
        s.duration_seconds = v
            .as_i64()
            .ok_or_else(|| ApiError::bad_request("duration_seconds must be an integer"))?;
    }
    if let Some(v) = payload.get("enabled") {
        s.enabled = v
            .as_bool()
            .ok_or_else(|| ApiError::bad_request("enabled must be a boolean"))?;
    }
    Ok(s)
}

/// `POST /setschedule`: admin only. Supplied fields merge onto the
/// current schedule; omitted fields keep their stored values.
pub async fn set_schedule(
    State(app): State<AppState>,
    op: Operator,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    op.require_admin()?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
    let device_id = payload_device_id(&payload, &app.config);

    let current = app.store.get_control(&device_id).await?;
    let schedule = apply_schedule_fields(current.schedule, &payload)?;
    if let Err(msg) = schedule.validate() {
        return Err(ApiError::bad_request(msg));
    }

    let doc = app
        .store
        .merge_control(
            &device_id,
            &ControlPatch {
                schedule: Some(schedule),
                ..ControlPatch::default()
            },
        )
        .await?;

    info!(device = %device_id, "schedule updated");
    app.state
        .write()
        .await
        .record_control(format!("{device_id}: schedule updated"));

    Ok(Json(json!({
        "status": "success",
        "device_id": device_id,
        "schedule": doc.schedule,
    })))
}

// ---------------------------------------------------------------------------
// Read APIs + export
// ---------------------------------------------------------------------------

/// `GET /api/summary[?device_id=X]`: everything the dashboard renders.
pub async fn api_summary(
    State(app): State<AppState>,
    _op: Operator,
    uri: Uri,
) -> Result<Json<dashboard::Summary>, ApiError> {
    let device_id =
        query_param(&uri, "device_id").unwrap_or_else(|| app.config.devices.primary.clone());
    let summary = dashboard::summarize(&app.config, &app.store, &app.state, &device_id).await?;
    Ok(Json(summary))
}

/// `GET /api/history?device_id=X&hours=N`: readings for charting.
/// Hours are clamped to one week; the default window is a day.
pub async fn api_history(
    State(app): State<AppState>,
    _op: Operator,
    uri: Uri,
) -> Result<Json<Value>, ApiError> {
    let device_id =
        query_param(&uri, "device_id").unwrap_or_else(|| app.config.devices.primary.clone());
    let hours = match query_param(&uri, "hours") {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| ApiError::bad_request(format!("invalid hours value '{raw}'")))?
            .clamp(1, 168),
        None => 24,
    };

    let until = Utc::now();
    let since = until - Duration::hours(hours);
    let readings = app.store.readings_range(&device_id, since, until).await?;

    Ok(Json(json!({
        "device_id": device_id,
        "hours": hours,
        "readings": readings,
    })))
}

/// `GET /exportpdf[?device_id=X]`: admin only. Last 24 hours of
/// readings as a PDF attachment.
pub async fn export_pdf(
    State(app): State<AppState>,
    op: Operator,
    uri: Uri,
) -> Result<Response, ApiError> {
    op.require_admin()?;

    let device_id =
        query_param(&uri, "device_id").unwrap_or_else(|| app.config.devices.primary.clone());
    let until = Utc::now();
    let since = until - Duration::hours(24);
    let readings = app.store.readings_range(&device_id, since, until).await?;

    let meta = ReportMeta {
        device_id: device_id.clone(),
        generated_at: until,
        since,
        until,
    };
    let pdf = render_pdf(&meta, &readings);
    info!(device = %device_id, rows = readings.len(), "report exported");

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"fish-feeder-report.pdf\"",
            ),
        ],
        pdf,
    )
        .into_response())
}

/// `GET /ping`: unauthenticated liveness probe.
pub async fn ping(State(app): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": app.store.available(),
        "timestamp": Utc::now(),
    }))
}
