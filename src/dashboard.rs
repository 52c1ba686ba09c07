//! Read-side composition for the operator dashboard. Nothing here is
//! cached: every call re-reads the store so the summary always reflects
//! the latest writes, and a store outage degrades to an empty view
//! instead of an error page.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, HopperEntry};
use crate::db::{ControlDoc, Reading};
use crate::state::{SharedState, SystemStatus};
use crate::store::{Store, StoreError};

/// How many recent readings the dashboard shows and charts.
pub const RECENT_WINDOW: i64 = 50;

/// Below this fill percentage the hopper warns for a refill.
pub const LOW_FEED_PERCENT: f64 = 20.0;

// Alert thresholds for a tropical freshwater tank.
const TURBIDITY_WARN_NTU: f64 = 50.0;
const TURBIDITY_DANGER_NTU: f64 = 100.0;
const TEMP_MIN_C: f64 = 20.0;
const TEMP_MAX_C: f64 = 30.0;
const PH_MIN: f64 = 6.5;
const PH_MAX: f64 = 8.5;
const AMMONIA_MAX_PPM: f64 = 0.5;

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity ordering follows declaration order; `max()` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Danger,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: &'static str,
    pub message: String,
}

/// Evaluate water-quality alerts against the most recent reading.
/// Every threshold that fires is reported, not just the first match.
pub fn evaluate_alerts(latest: Option<&Reading>) -> Vec<Alert> {
    let Some(r) = latest else {
        return Vec::new();
    };
    let mut alerts = Vec::new();

    if let Some(t) = r.turbidity {
        if t > TURBIDITY_DANGER_NTU {
            alerts.push(Alert {
                level: AlertLevel::Danger,
                metric: "turbidity",
                message: format!("Water too cloudy ({t:.0} NTU)"),
            });
        } else if t > TURBIDITY_WARN_NTU {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "turbidity",
                message: format!("Water getting cloudy ({t:.0} NTU)"),
            });
        }
    }

    if let Some(v) = r.temperature {
        if !(TEMP_MIN_C..=TEMP_MAX_C).contains(&v) {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "temperature",
                message: format!("Temperature out of range ({v:.1} C)"),
            });
        }
    }

    if let Some(v) = r.ph {
        if !(PH_MIN..=PH_MAX).contains(&v) {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "ph",
                message: format!("pH out of range ({v:.2})"),
            });
        }
    }

    if let Some(v) = r.ammonia {
        if v > AMMONIA_MAX_PPM {
            alerts.push(Alert {
                level: AlertLevel::Danger,
                metric: "ammonia",
                message: format!("Ammonia too high ({v:.2} ppm)"),
            });
        }
    }

    alerts
}

pub fn overall_level(alerts: &[Alert]) -> AlertLevel {
    alerts
        .iter()
        .map(|a| a.level)
        .max()
        .unwrap_or(AlertLevel::Normal)
}

// ---------------------------------------------------------------------------
// Feeder + hopper derivations
// ---------------------------------------------------------------------------

/// One-line feeder summary shown in the dashboard header.
pub fn feeder_line(control: &ControlDoc) -> String {
    if control.feeder_speed > 0 {
        format!("Feeding at {}%", control.feeder_speed)
    } else {
        "Feeder OFF".to_string()
    }
}

/// Convert an ultrasonic distance reading into a hopper fill percentage
/// using the configured full/empty calibration endpoints. Result is
/// clamped so out-of-range readings don't produce nonsensical values.
pub fn compute_feed_level(distance_cm: f64, full_cm: f64, empty_cm: f64) -> f64 {
    let range = empty_cm - full_cm;
    if range <= 0.0 {
        return 0.0; // degenerate calibration, avoid div-by-zero
    }
    let pct = (empty_cm - distance_cm) / range * 100.0;
    pct.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct HopperStatus {
    pub device_id: String,
    pub feed_level_percent: f64,
    pub low: bool,
    pub measured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Summary assembly
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct Summary {
    pub device_id: String,
    pub feeder_line: String,
    pub alert_level: AlertLevel,
    pub alerts: Vec<Alert>,
    pub control: ControlDoc,
    pub readings: Vec<Reading>,
    pub hopper: Option<HopperStatus>,
    pub system: SystemStatus,
}

/// Treat a missing store as an empty one; real backend failures propagate.
fn degrade<T>(res: Result<T, StoreError>, fallback: T) -> Result<T, StoreError> {
    match res {
        Ok(v) => Ok(v),
        Err(StoreError::Unavailable) => Ok(fallback),
        Err(e) => Err(e),
    }
}

async fn hopper_status(
    store: &Store,
    hopper: &HopperEntry,
) -> Result<Option<HopperStatus>, StoreError> {
    let readings = degrade(store.latest_readings(&hopper.device_id, 1).await, Vec::new())?;
    let Some(r) = readings.last() else {
        return Ok(None);
    };
    let Some(distance) = r.distance else {
        return Ok(None);
    };
    let percent = compute_feed_level(distance, hopper.full_cm, hopper.empty_cm);
    Ok(Some(HopperStatus {
        device_id: hopper.device_id.clone(),
        feed_level_percent: percent,
        low: percent < LOW_FEED_PERCENT,
        measured_at: r.created_at,
    }))
}

/// Build the full dashboard view for one device.
pub async fn summarize(
    config: &Config,
    store: &Store,
    state: &SharedState,
    device_id: &str,
) -> Result<Summary, StoreError> {
    let readings = degrade(
        store.latest_readings(device_id, RECENT_WINDOW).await,
        Vec::new(),
    )?;
    let control = degrade(
        store.get_control(device_id).await,
        ControlDoc::default_for(device_id),
    )?;

    let hopper = match &config.devices.hopper {
        Some(h) => hopper_status(store, h).await?,
        None => None,
    };

    let mut alerts = evaluate_alerts(readings.last());
    if let Some(h) = &hopper {
        if h.low {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "feed_level",
                message: format!("Feed hopper low ({:.0}%)", h.feed_level_percent),
            });
        }
    }

    let system = state.read().await.to_status();

    Ok(Summary {
        device_id: device_id.to_string(),
        feeder_line: feeder_line(&control),
        alert_level: overall_level(&alerts),
        alerts,
        control,
        readings,
        hopper,
        system,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Auth, Devices, OperatorEntry, Role};
    use crate::control::ActuatorStatus;
    use crate::db::{ControlPatch, Db};
    use crate::normalize::NewReading;
    use crate::state::SystemState;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn test_reading(turbidity: Option<f64>) -> Reading {
        Reading {
            id: 1,
            device_id: "ESP32001".into(),
            temperature: None,
            ph: None,
            ammonia: None,
            turbidity,
            distance: None,
            created_at: Utc::now(),
        }
    }

    fn test_config(hopper: Option<HopperEntry>) -> Config {
        Config {
            devices: Devices {
                primary: "ESP32001".into(),
                hopper,
            },
            auth: Auth::default(),
            operators: vec![OperatorEntry {
                email: "owner@example.com".into(),
                password_sha256: crate::config::sha256_hex("fishfood"),
                role: Role::Admin,
            }],
        }
    }

    async fn memory_store() -> Store {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        Store::new(Some(db))
    }

    fn shared_state() -> SharedState {
        Arc::new(RwLock::new(SystemState::new()))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    // -- alert thresholds --------------------------------------------------

    #[test]
    fn no_reading_no_alerts() {
        assert!(evaluate_alerts(None).is_empty());
    }

    #[test]
    fn clean_reading_no_alerts() {
        let r = Reading {
            temperature: Some(25.0),
            ph: Some(7.2),
            ammonia: Some(0.1),
            turbidity: Some(20.0),
            ..test_reading(None)
        };
        assert!(evaluate_alerts(Some(&r)).is_empty());
    }

    #[test]
    fn turbidity_above_danger_threshold() {
        let alerts = evaluate_alerts(Some(&test_reading(Some(120.0))));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Danger);
        assert_eq!(alerts[0].metric, "turbidity");
    }

    #[test]
    fn turbidity_in_warning_band() {
        let alerts = evaluate_alerts(Some(&test_reading(Some(75.0))));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn turbidity_boundaries() {
        // 50 is still clean, 100 is still only a warning.
        assert!(evaluate_alerts(Some(&test_reading(Some(50.0)))).is_empty());
        let at_100 = evaluate_alerts(Some(&test_reading(Some(100.0))));
        assert_eq!(at_100[0].level, AlertLevel::Warning);
    }

    #[test]
    fn temperature_out_of_range_warns() {
        for v in [19.9, 30.1] {
            let r = Reading {
                temperature: Some(v),
                ..test_reading(None)
            };
            let alerts = evaluate_alerts(Some(&r));
            assert_eq!(alerts.len(), 1, "temperature {v}");
            assert_eq!(alerts[0].metric, "temperature");
        }
    }

    #[test]
    fn ph_out_of_range_warns() {
        let r = Reading {
            ph: Some(9.0),
            ..test_reading(None)
        };
        let alerts = evaluate_alerts(Some(&r));
        assert_eq!(alerts[0].metric, "ph");
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn ammonia_above_max_is_danger() {
        let r = Reading {
            ammonia: Some(0.6),
            ..test_reading(None)
        };
        let alerts = evaluate_alerts(Some(&r));
        assert_eq!(alerts[0].metric, "ammonia");
        assert_eq!(alerts[0].level, AlertLevel::Danger);
    }

    #[test]
    fn cooccurring_alerts_all_reported() {
        let r = Reading {
            ph: Some(9.0),
            turbidity: Some(120.0),
            ..test_reading(None)
        };
        let alerts = evaluate_alerts(Some(&r));
        assert_eq!(alerts.len(), 2);
        assert_eq!(overall_level(&alerts), AlertLevel::Danger);
    }

    #[test]
    fn absent_fields_raise_nothing() {
        let alerts = evaluate_alerts(Some(&test_reading(None)));
        assert!(alerts.is_empty());
    }

    // -- feeder line -------------------------------------------------------

    #[test]
    fn feeder_line_reflects_speed() {
        let mut doc = ControlDoc::default_for("ESP32001");
        assert_eq!(feeder_line(&doc), "Feeder OFF");

        doc.feeder_status = ActuatorStatus::On;
        doc.feeder_speed = 70;
        assert_eq!(feeder_line(&doc), "Feeding at 70%");
    }

    // -- hopper level ------------------------------------------------------

    #[test]
    fn feed_level_endpoints() {
        assert_eq!(compute_feed_level(5.0, 5.0, 30.0), 100.0);
        assert_eq!(compute_feed_level(30.0, 5.0, 30.0), 0.0);
    }

    #[test]
    fn feed_level_is_linear_between_endpoints() {
        assert_eq!(compute_feed_level(17.5, 5.0, 30.0), 50.0);
    }

    #[test]
    fn feed_level_clamps_outside_calibration() {
        assert_eq!(compute_feed_level(2.0, 5.0, 30.0), 100.0);
        assert_eq!(compute_feed_level(45.0, 5.0, 30.0), 0.0);
    }

    #[test]
    fn feed_level_degenerate_calibration_reads_empty() {
        assert_eq!(compute_feed_level(10.0, 30.0, 30.0), 0.0);
    }

    // -- summarize ---------------------------------------------------------

    #[tokio::test]
    async fn summary_over_live_store() {
        let store = memory_store().await;
        for i in 0..60 {
            let r = NewReading {
                turbidity: Some(if i == 59 { 120.0 } else { 20.0 }),
                ..NewReading::default()
            };
            store
                .append_reading_at("ESP32001", &r, at(i * 60))
                .await
                .unwrap();
        }
        store
            .merge_control(
                "ESP32001",
                &ControlPatch {
                    feeder: Some((ActuatorStatus::On, 70)),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap();

        let cfg = test_config(None);
        let summary = summarize(&cfg, &store, &shared_state(), "ESP32001")
            .await
            .unwrap();

        assert_eq!(summary.readings.len(), RECENT_WINDOW as usize);
        assert!(summary
            .readings
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(summary.alert_level, AlertLevel::Danger);
        assert_eq!(summary.feeder_line, "Feeding at 70%");
        assert!(summary.hopper.is_none());
    }

    #[tokio::test]
    async fn alerts_follow_only_the_latest_reading() {
        let store = memory_store().await;
        let cloudy = NewReading {
            turbidity: Some(120.0),
            ..NewReading::default()
        };
        let clear = NewReading {
            turbidity: Some(30.0),
            ..NewReading::default()
        };
        store
            .append_reading_at("ESP32001", &cloudy, at(0))
            .await
            .unwrap();
        store
            .append_reading_at("ESP32001", &clear, at(60))
            .await
            .unwrap();

        let cfg = test_config(None);
        let summary = summarize(&cfg, &store, &shared_state(), "ESP32001")
            .await
            .unwrap();
        assert_eq!(summary.alert_level, AlertLevel::Normal);
        assert!(summary.alerts.is_empty());
    }

    #[tokio::test]
    async fn summary_degrades_when_store_offline() {
        let store = Store::new(None);
        let cfg = test_config(Some(HopperEntry {
            device_id: "ESP32002".into(),
            full_cm: 5.0,
            empty_cm: 30.0,
        }));

        let summary = summarize(&cfg, &store, &shared_state(), "ESP32001")
            .await
            .unwrap();
        assert!(summary.readings.is_empty());
        assert_eq!(summary.control.feeder_status, ActuatorStatus::Off);
        assert_eq!(summary.alert_level, AlertLevel::Normal);
        assert!(summary.hopper.is_none());
        assert_eq!(summary.feeder_line, "Feeder OFF");
    }

    #[tokio::test]
    async fn hopper_level_and_low_warning() {
        let store = memory_store().await;
        let r = NewReading {
            distance: Some(28.0),
            ..NewReading::default()
        };
        store
            .append_reading_at("ESP32002", &r, at(0))
            .await
            .unwrap();

        let cfg = test_config(Some(HopperEntry {
            device_id: "ESP32002".into(),
            full_cm: 5.0,
            empty_cm: 30.0,
        }));
        let summary = summarize(&cfg, &store, &shared_state(), "ESP32001")
            .await
            .unwrap();

        let hopper = summary.hopper.unwrap();
        assert_eq!(hopper.feed_level_percent, 8.0);
        assert!(hopper.low);
        assert!(summary
            .alerts
            .iter()
            .any(|a| a.metric == "feed_level" && a.level == AlertLevel::Warning));
    }

    #[tokio::test]
    async fn hopper_without_distance_reading_is_absent() {
        let store = memory_store().await;
        let r = NewReading {
            temperature: Some(24.0),
            ..NewReading::default()
        };
        store
            .append_reading_at("ESP32002", &r, at(0))
            .await
            .unwrap();

        let cfg = test_config(Some(HopperEntry {
            device_id: "ESP32002".into(),
            full_cm: 5.0,
            empty_cm: 30.0,
        }));
        let summary = summarize(&cfg, &store, &shared_state(), "ESP32001")
            .await
            .unwrap();
        assert!(summary.hopper.is_none());
    }
}
