use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Ephemeral server-side bookkeeping: uptime, per-device liveness, ingest
/// counters, and a bounded ring of recent activity for the dashboard.
/// Everything here is rebuilt from scratch on restart; the store stays the
/// source of truth for readings and control documents.
pub struct SystemState {
    pub started_at: Instant,
    pub store_online: bool,
    pub devices: HashMap<String, DeviceState>,
    pub readings_stored: u64,
    pub readings_dropped: u64,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct DeviceState {
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Control,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON snapshot (what the summary endpoint embeds)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SystemStatus {
    pub uptime_secs: u64,
    pub store_online: bool,
    pub readings_stored: u64,
    pub readings_dropped: u64,
    pub devices: HashMap<String, DeviceState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            store_online: false,
            devices: HashMap::new(),
            readings_stored: 0,
            readings_dropped: 0,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record a successfully stored telemetry reading.
    pub fn record_reading(&mut self, device_id: &str, detail: String) {
        self.mark_seen(device_id);
        self.readings_stored += 1;
        self.push_event(EventKind::Reading, detail);
    }

    /// Record a reading the store failed to keep. The device still counts
    /// as seen; it reported in even though the sample was not persisted.
    pub fn record_dropped_reading(&mut self, device_id: &str, detail: String) {
        self.mark_seen(device_id);
        self.readings_dropped += 1;
        self.push_event(EventKind::Error, detail);
    }

    /// Record an actuator or schedule change.
    pub fn record_control(&mut self, detail: String) {
        self.push_event(EventKind::Control, detail);
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serializable status snapshot, newest event first.
    pub fn to_status(&self) -> SystemStatus {
        SystemStatus {
            uptime_secs: self.started_at.elapsed().as_secs(),
            store_online: self.store_online,
            readings_stored: self.readings_stored,
            readings_dropped: self.readings_dropped,
            devices: self.devices.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    /// Refresh a device's last-contact timestamp without counting a reading.
    pub fn mark_seen(&mut self, device_id: &str) {
        self.devices.insert(
            device_id.to_string(),
            DeviceState {
                last_seen: Utc::now(),
            },
        );
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
