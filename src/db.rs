//! SQLite persistence: append-only telemetry readings and one mutable
//! control document per device.
//!
//! Timestamps are stored as epoch milliseconds so same-second bursts from a
//! feeder keep their order; `chrono` types appear only at the API edges.
//! Queries use the runtime API with explicit binds — the schema lives in
//! `./migrations` and is embedded at compile time by `sqlx::migrate!`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use crate::control::ActuatorStatus;
use crate::normalize::NewReading;

/// Longest feed pulse a schedule may request, in seconds.
pub const MAX_FEED_DURATION_SEC: i64 = 3600;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One persisted telemetry sample.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub id: i64,
    pub device_id: String,
    pub temperature: Option<f64>,
    pub ph: Option<f64>,
    pub ammonia: Option<f64>,
    pub turbidity: Option<f64>,
    pub distance: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// The mutable per-device control document. Devices that have never been
/// written read back as `default_for`: everything off, stock schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ControlDoc {
    pub device_id: String,
    pub feeder_status: ActuatorStatus,
    pub feeder_speed: i64,
    pub motor_status: ActuatorStatus,
    pub motor_speed: i64,
    pub schedule: FeedingSchedule,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ControlDoc {
    pub fn default_for(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            feeder_status: ActuatorStatus::Off,
            feeder_speed: 0,
            motor_status: ActuatorStatus::Off,
            motor_speed: 0,
            schedule: FeedingSchedule::default(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingSchedule {
    pub first_feed: String,
    pub second_feed: String,
    pub duration_seconds: i64,
    pub enabled: bool,
}

impl Default for FeedingSchedule {
    fn default() -> Self {
        Self {
            first_feed: "08:00".to_string(),
            second_feed: "18:00".to_string(),
            duration_seconds: 10,
            enabled: false,
        }
    }
}

impl FeedingSchedule {
    /// Check the schedule an operator submitted. Times are 24h `HH:MM`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !is_valid_hhmm(&self.first_feed) {
            return Err(format!(
                "first_feed '{}' is not a valid HH:MM time",
                self.first_feed
            ));
        }
        if !is_valid_hhmm(&self.second_feed) {
            return Err(format!(
                "second_feed '{}' is not a valid HH:MM time",
                self.second_feed
            ));
        }
        if !(1..=MAX_FEED_DURATION_SEC).contains(&self.duration_seconds) {
            return Err(format!(
                "duration_seconds {} out of range [1, {MAX_FEED_DURATION_SEC}]",
                self.duration_seconds
            ));
        }
        Ok(())
    }
}

/// Strict `HH:MM`: exactly two digits, a colon, two digits, in range.
pub fn is_valid_hhmm(s: &str) -> bool {
    fn two_digits(part: &str) -> Option<u32> {
        if part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit()) {
            part.parse().ok()
        } else {
            None
        }
    }
    match s.split_once(':') {
        Some((h, m)) => matches!((two_digits(h), two_digits(m)), (Some(h), Some(m)) if h < 24 && m < 60),
        None => false,
    }
}

/// Partial update for a control document: only the populated parts change.
#[derive(Debug, Clone, Default)]
pub struct ControlPatch {
    pub feeder: Option<(ActuatorStatus, i64)>,
    pub motor: Option<(ActuatorStatus, i64)>,
    pub schedule: Option<FeedingSchedule>,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    // Stored values are always in range; clamp to epoch if a row was edited
    // by hand into something unrepresentable.
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, sqlx::Error> {
    Ok(Reading {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        temperature: row.try_get("temperature")?,
        ph: row.try_get("ph")?,
        ammonia: row.try_get("ammonia")?,
        turbidity: row.try_get("turbidity")?,
        distance: row.try_get("distance")?,
        created_at: ms_to_datetime(row.try_get("created_at_ms")?),
    })
}

fn control_from_row(row: &SqliteRow) -> Result<ControlDoc, sqlx::Error> {
    let feeder_status: String = row.try_get("feeder_status")?;
    let motor_status: String = row.try_get("motor_status")?;
    Ok(ControlDoc {
        device_id: row.try_get("device_id")?,
        feeder_status: ActuatorStatus::parse(&feeder_status),
        feeder_speed: row.try_get("feeder_speed")?,
        motor_status: ActuatorStatus::parse(&motor_status),
        motor_speed: row.try_get("motor_speed")?,
        schedule: FeedingSchedule {
            first_feed: row.try_get("first_feed")?,
            second_feed: row.try_get("second_feed")?,
            duration_seconds: row.try_get("duration_seconds")?,
            enabled: row.try_get::<i64, _>("schedule_enabled")? != 0,
        },
        updated_at: Some(ms_to_datetime(row.try_get("updated_at_ms")?)),
    })
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

impl Db {
    /// db_url examples:
    /// - "sqlite:fishfeeder.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Readings
    // ----------------------------

    pub async fn insert_reading(
        &self,
        device_id: &str,
        r: &NewReading,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO readings (device_id, temperature, ph, ammonia, turbidity, distance, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(device_id)
        .bind(r.temperature)
        .bind(r.ph)
        .bind(r.ammonia)
        .bind(r.turbidity)
        .bind(r.distance)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(res.last_insert_rowid())
    }

    /// The `n` most recent readings for a device, oldest first. Callers
    /// always get chronological order; the newest-first fetch is internal.
    pub async fn latest_readings(&self, device_id: &str, n: i64) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, temperature, ph, ammonia, turbidity, distance, created_at_ms
            FROM readings
            WHERE device_id = ?
            ORDER BY created_at_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .context("latest_readings failed")?;

        let mut readings = rows
            .iter()
            .map(reading_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("latest_readings row decode failed")?;
        readings.reverse();
        Ok(readings)
    }

    /// All readings in `[since, until]` for a device, oldest first.
    pub async fn readings_range(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, temperature, ph, ammonia, turbidity, distance, created_at_ms
            FROM readings
            WHERE device_id = ? AND created_at_ms >= ? AND created_at_ms <= ?
            ORDER BY created_at_ms ASC, id ASC
            "#,
        )
        .bind(device_id)
        .bind(since.timestamp_millis())
        .bind(until.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("readings_range failed")?;

        rows.iter()
            .map(reading_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("readings_range row decode failed")
    }

    // ----------------------------
    // Control documents
    // ----------------------------

    pub async fn get_control(&self, device_id: &str) -> Result<ControlDoc> {
        let row = sqlx::query(
            r#"
            SELECT device_id, feeder_status, feeder_speed, motor_status, motor_speed,
                   first_feed, second_feed, duration_seconds, schedule_enabled, updated_at_ms
            FROM device_controls
            WHERE device_id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_control failed")?;

        match row {
            Some(r) => control_from_row(&r).context("get_control row decode failed"),
            None => Ok(ControlDoc::default_for(device_id)),
        }
    }

    /// Apply a partial update and return the resulting document.
    /// Unpopulated parts of the patch keep their stored values.
    pub async fn merge_control(&self, device_id: &str, patch: &ControlPatch) -> Result<ControlDoc> {
        let mut tx = self.pool.begin().await.context("merge_control begin failed")?;

        let row = sqlx::query(
            r#"
            SELECT device_id, feeder_status, feeder_speed, motor_status, motor_speed,
                   first_feed, second_feed, duration_seconds, schedule_enabled, updated_at_ms
            FROM device_controls
            WHERE device_id = ?
            "#,
        )
        .bind(device_id)
        .fetch_optional(&mut *tx)
        .await
        .context("merge_control read failed")?;

        let mut doc = match row {
            Some(r) => control_from_row(&r).context("merge_control row decode failed")?,
            None => ControlDoc::default_for(device_id),
        };

        if let Some((status, speed)) = patch.feeder {
            doc.feeder_status = status;
            doc.feeder_speed = speed;
        }
        if let Some((status, speed)) = patch.motor {
            doc.motor_status = status;
            doc.motor_speed = speed;
        }
        if let Some(schedule) = &patch.schedule {
            doc.schedule = schedule.clone();
        }
        doc.updated_at = Some(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO device_controls (
              device_id, feeder_status, feeder_speed, motor_status, motor_speed,
              first_feed, second_feed, duration_seconds, schedule_enabled, updated_at_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET
              feeder_status=excluded.feeder_status,
              feeder_speed=excluded.feeder_speed,
              motor_status=excluded.motor_status,
              motor_speed=excluded.motor_speed,
              first_feed=excluded.first_feed,
              second_feed=excluded.second_feed,
              duration_seconds=excluded.duration_seconds,
              schedule_enabled=excluded.schedule_enabled,
              updated_at_ms=excluded.updated_at_ms
            "#,
        )
        .bind(device_id)
        .bind(doc.feeder_status.as_str())
        .bind(doc.feeder_speed)
        .bind(doc.motor_status.as_str())
        .bind(doc.motor_speed)
        .bind(&doc.schedule.first_feed)
        .bind(&doc.schedule.second_feed)
        .bind(doc.schedule.duration_seconds)
        .bind(doc.schedule.enabled as i64)
        .bind(doc.updated_at.map(|t| t.timestamp_millis()).unwrap_or_default())
        .execute(&mut *tx)
        .await
        .context("merge_control write failed")?;

        tx.commit().await.context("merge_control commit failed")?;
        Ok(doc)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
