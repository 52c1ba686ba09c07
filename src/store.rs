//! The store every handler talks to. Wraps an optional [`Db`] so one place
//! owns the question "do we have a database right now?".
//!
//! When the database cannot be opened at boot the server keeps running with
//! `Store::new(None)`: every call here answers [`StoreError::Unavailable`]
//! and each caller applies its own policy (device routes mask it, operator
//! routes surface a 503).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{ControlDoc, ControlPatch, Db, Reading};
use crate::normalize::NewReading;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data store unavailable")]
    Unavailable,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct Store {
    db: Option<Db>,
}

impl Store {
    pub fn new(db: Option<Db>) -> Self {
        Self { db }
    }

    pub fn available(&self) -> bool {
        self.db.is_some()
    }

    fn db(&self) -> Result<&Db, StoreError> {
        self.db.as_ref().ok_or(StoreError::Unavailable)
    }

    pub async fn append_reading(
        &self,
        device_id: &str,
        reading: &NewReading,
    ) -> Result<i64, StoreError> {
        Ok(self
            .db()?
            .insert_reading(device_id, reading, Utc::now())
            .await?)
    }

    /// Test-friendly variant with an explicit timestamp.
    #[cfg(test)]
    pub async fn append_reading_at(
        &self,
        device_id: &str,
        reading: &NewReading,
        created_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self
            .db()?
            .insert_reading(device_id, reading, created_at)
            .await?)
    }

    pub async fn latest_readings(
        &self,
        device_id: &str,
        n: i64,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(self.db()?.latest_readings(device_id, n).await?)
    }

    pub async fn readings_range(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        Ok(self.db()?.readings_range(device_id, since, until).await?)
    }

    pub async fn get_control(&self, device_id: &str) -> Result<ControlDoc, StoreError> {
        Ok(self.db()?.get_control(device_id).await?)
    }

    pub async fn merge_control(
        &self,
        device_id: &str,
        patch: &ControlPatch,
    ) -> Result<ControlDoc, StoreError> {
        Ok(self.db()?.merge_control(device_id, patch).await?)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
