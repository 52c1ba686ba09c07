//! TOML config file loading and validation: device identities, hopper
//! calibration, and operator accounts.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub devices: Devices,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub operators: Vec<OperatorEntry>,
}

#[derive(Debug, Deserialize)]
pub struct Devices {
    /// Device credited with payloads that omit their own `device_id`.
    pub primary: String,
    /// Feed-hopper level sensor, when one is installed.
    pub hopper: Option<HopperEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HopperEntry {
    pub device_id: String,
    /// Ultrasonic distance to the feed surface when the hopper is full.
    pub full_cm: f64,
    /// Same measurement when the hopper is empty.
    pub empty_cm: f64,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_minutes: i64,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            session_ttl_minutes: default_session_ttl(),
        }
    }
}

fn default_session_ttl() -> i64 {
    720
}

#[derive(Debug, Deserialize)]
pub struct OperatorEntry {
    pub email: String,
    /// Hex SHA-256 of the operator's password; the file never holds
    /// plaintext. `printf %s 'pw' | sha256sum` produces the value.
    pub password_sha256: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Sessions may live at most 31 days; anything longer keeps dead logins
/// in memory for no operational gain.
const MAX_SESSION_TTL_MINUTES: i64 = 44_640;

fn valid_device_id(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_devices(&mut errors);
        self.validate_auth(&mut errors);
        self.validate_operators(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_devices(&self, errors: &mut Vec<String>) {
        if !valid_device_id(&self.devices.primary) {
            errors.push(format!(
                "devices.primary '{}' must be non-empty ASCII letters, digits, '_' or '-'",
                self.devices.primary
            ));
        }

        if let Some(h) = &self.devices.hopper {
            if !valid_device_id(&h.device_id) {
                errors.push(format!(
                    "hopper device_id '{}' must be non-empty ASCII letters, digits, '_' or '-'",
                    h.device_id
                ));
            }
            if !(h.full_cm > 0.0) {
                errors.push(format!(
                    "hopper full_cm must be positive, got {}",
                    h.full_cm
                ));
            }
            if !(h.empty_cm > h.full_cm) {
                errors.push(format!(
                    "hopper empty_cm ({}) must be greater than full_cm ({})",
                    h.empty_cm, h.full_cm
                ));
            }
        }
    }

    fn validate_auth(&self, errors: &mut Vec<String>) {
        let ttl = self.auth.session_ttl_minutes;
        if ttl <= 0 {
            errors.push(format!("auth.session_ttl_minutes must be positive, got {ttl}"));
        } else if ttl > MAX_SESSION_TTL_MINUTES {
            errors.push(format!(
                "auth.session_ttl_minutes {ttl} exceeds maximum {MAX_SESSION_TTL_MINUTES} (31 days)"
            ));
        }
    }

    fn validate_operators(&self, errors: &mut Vec<String>) {
        if self.operators.is_empty() {
            errors.push("at least one operator account is required".to_string());
        }

        let mut seen_emails: HashSet<String> = HashSet::new();
        for (i, op) in self.operators.iter().enumerate() {
            let ctx = || {
                if op.email.is_empty() {
                    format!("operators[{i}]")
                } else {
                    format!("operator '{}'", op.email)
                }
            };

            if op.email.trim().is_empty() {
                errors.push(format!("{}: email is empty", ctx()));
            } else if !op.email.contains('@') {
                errors.push(format!("{}: email has no '@'", ctx()));
            } else if !seen_emails.insert(op.email.to_ascii_lowercase()) {
                errors.push(format!("{}: duplicate email", ctx()));
            }

            if op.password_sha256.len() != 64
                || !op.password_sha256.bytes().all(|b| b.is_ascii_hexdigit())
            {
                errors.push(format!(
                    "{}: password_sha256 must be 64 hex characters",
                    ctx()
                ));
            }
        }

        if !self.operators.is_empty() && !self.operators.iter().any(|o| o.role == Role::Admin) {
            errors.push("at least one operator must have the admin role".to_string());
        }
    }

    // ----------------------------
    // Lookups
    // ----------------------------

    /// Check a login attempt. Emails match case-insensitively; the password
    /// is digested and compared against the stored hex.
    pub fn verify_operator(&self, email: &str, password: &str) -> Option<Role> {
        let digest = sha256_hex(password);
        self.operators
            .iter()
            .find(|o| {
                o.email.eq_ignore_ascii_case(email)
                    && o.password_sha256.eq_ignore_ascii_case(&digest)
            })
            .map(|o| o.role)
    }
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
