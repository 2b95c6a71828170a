//! Short-lived admin session tokens bound to an API key.
//!
//! Sessions are a convenience credential for the admin UI: they resolve to
//! the API key that created them and carry no permissions of their own.
//! Nothing is persisted; a restart drops every session.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::clock::Clock;

const TOKEN_BYTES: usize = 24;

/// Longest lifetime a session can be issued with (30 days)
pub const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Issued session handed back to the caller
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    api_key: String,
    expires_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    clock: Arc<dyn Clock>,
    default_ttl_secs: u64,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, default_ttl_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
            default_ttl_secs,
        }
    }

    /// Issue a session for `api_key`, valid for `ttl_secs` (or the default),
    /// capped at [`MAX_TTL_SECS`]
    pub fn create(&self, api_key: &str, ttl_secs: Option<u64>) -> Session {
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs).min(MAX_TTL_SECS);
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(Duration::seconds(ttl as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let token = loop {
            let token = generate_token();
            if !self.sessions.contains_key(&token) {
                break token;
            }
        };

        self.sessions.insert(
            token.clone(),
            SessionEntry {
                api_key: api_key.to_string(),
                expires_at,
            },
        );

        Session { token, expires_at }
    }

    /// Resolve a token to its API key. Expired sessions are removed on the
    /// spot and report `None`.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = self.clock.now();
        let entry = self.sessions.get(token)?.clone();

        if now > entry.expires_at {
            self.sessions.remove(token);
            debug!("Removed expired admin session");
            return None;
        }

        Some(entry.api_key)
    }

    pub fn delete(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every expired session; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now <= s.expires_at);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
