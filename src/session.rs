//! In-memory operator sessions. Tokens are random UUIDs handed out at
//! login and carried in a cookie; expired entries are pruned on every
//! access so the map cannot grow past the set of live sessions.
//!
//! Sessions deliberately live outside the store: operators must be able to
//! sign in and see the dashboard while the database is down.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Role;

pub const SESSION_COOKIE: &str = "feeder_session";

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub email: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

fn cleanup_expired(sessions: &mut HashMap<String, Session>) {
    let now = Utc::now();
    sessions.retain(|_, s| s.expires_at > now);
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub async fn create(&self, email: &str, role: Role) -> Session {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role,
            expires_at: Utc::now() + self.ttl,
        };
        let mut sessions = self.inner.write().await;
        cleanup_expired(&mut sessions);
        sessions.insert(session.token.clone(), session.clone());
        session
    }

    pub async fn get(&self, token: &str) -> Option<Session> {
        let mut sessions = self.inner.write().await;
        cleanup_expired(&mut sessions);
        sessions.get(token).cloned()
    }

    pub async fn revoke(&self, token: &str) {
        self.inner.write().await.remove(token);
    }
}

// ---------------------------------------------------------------------------
// Cookie plumbing
// ---------------------------------------------------------------------------

/// Pull the session token out of a `Cookie` request header, if present.
pub fn cookie_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        if let Some((name, value)) = pair.trim().split_once('=') {
            if name == SESSION_COOKIE && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value clearing the session on logout.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderMap, HeaderValue};

    // -- session store -----------------------------------------------------

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = SessionStore::new(60);
        let session = store.create("owner@example.com", Role::Admin).await;

        let got = store.get(&session.token).await.unwrap();
        assert_eq!(got.email, "owner@example.com");
        assert_eq!(got.role, Role::Admin);
        assert!(got.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let store = SessionStore::new(60);
        assert!(store.get("not-a-token").await.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_pruned() {
        // Negative TTL makes every session born expired.
        let store = SessionStore::new(-1);
        let session = store.create("owner@example.com", Role::Admin).await;
        assert!(store.get(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn revoke_removes_session() {
        let store = SessionStore::new(60);
        let session = store.create("owner@example.com", Role::Viewer).await;
        store.revoke(&session.token).await;
        assert!(store.get(&session.token).await.is_none());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = SessionStore::new(60);
        let a = store.create("a@example.com", Role::Admin).await;
        let b = store.create("b@example.com", Role::Viewer).await;
        store.revoke(&a.token).await;

        assert!(store.get(&a.token).await.is_none());
        assert_eq!(store.get(&b.token).await.unwrap().email, "b@example.com");
    }

    // -- cookie parsing ----------------------------------------------------

    #[test]
    fn token_parsed_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; feeder_session=abc-123; lang=en"),
        );
        assert_eq!(cookie_token(&headers), Some("abc-123".to_string()));
    }

    #[test]
    fn missing_cookie_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(cookie_token(&headers), None);
    }

    #[test]
    fn other_cookies_only_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(cookie_token(&headers), None);
    }

    #[test]
    fn empty_token_value_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("feeder_session="),
        );
        assert_eq!(cookie_token(&headers), None);
    }

    // -- cookie formatting -------------------------------------------------

    #[test]
    fn session_cookie_is_http_only() {
        let c = session_cookie("abc", 3600);
        assert!(c.starts_with("feeder_session=abc;"));
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("Max-Age=3600"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let c = clear_session_cookie();
        assert!(c.contains("Max-Age=0"));
    }
}
