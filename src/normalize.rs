//! Lenient extraction of sensor fields from raw telemetry payloads.
//!
//! Feeder firmware ships whatever its sensors produced: numbers, numeric
//! strings, empty strings after a read failure, or fields missing outright.
//! Ingestion never rejects a payload: each field either parses to a finite
//! number or is recorded as absent.

use serde_json::Value;

/// Raw turbidity sensors spike far beyond their usable range when the
/// optical window fouls. Values are clamped to this ceiling at ingestion
/// so a single spike cannot distort every downstream average and chart.
pub const TURBIDITY_MAX: f64 = 3000.0;

/// One normalized telemetry sample, ready to append to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewReading {
    pub temperature: Option<f64>,
    pub ph: Option<f64>,
    pub ammonia: Option<f64>,
    pub turbidity: Option<f64>,
    pub distance: Option<f64>,
}

impl NewReading {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.ph.is_none()
            && self.ammonia.is_none()
            && self.turbidity.is_none()
            && self.distance.is_none()
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Pull a numeric field out of a JSON payload. Accepts JSON numbers and
/// numeric strings (trimmed); anything else is treated as absent.
/// Non-finite values are absent too; NaN must never reach the store.
pub fn field_as_f64(payload: &Value, key: &str) -> Option<f64> {
    let v = match payload.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Clamp turbidity into `[0, TURBIDITY_MAX]` NTU. Idempotent.
pub fn clamp_turbidity(v: f64) -> f64 {
    v.clamp(0.0, TURBIDITY_MAX)
}

/// Normalize a raw telemetry payload into a `NewReading`.
pub fn normalize(payload: &Value) -> NewReading {
    NewReading {
        temperature: field_as_f64(payload, "temperature"),
        ph: field_as_f64(payload, "ph"),
        ammonia: field_as_f64(payload, "ammonia"),
        turbidity: field_as_f64(payload, "turbidity").map(clamp_turbidity),
        distance: field_as_f64(payload, "distance"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
