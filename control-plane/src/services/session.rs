use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::services::rate_limit::store_unavailable;
use crate::services::store::SharedStore;

/// Stored form of a session in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    identity_id: i64,
    last_activity: DateTime<Utc>,
}

/// A session as seen by one worker. `last_activity` is the local copy used
/// when the shared store cannot be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub identity_id: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    /// Inactive longer than the configured lifetime.
    Expired,
    /// Record removed from a reachable store (logout, flush, eviction).
    Revoked,
}

/// Approximate by contract: the active set is only shrunk by a mass flush
/// or by its own rolling TTL, so stale sessions are over-counted in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSessionCount {
    Approximate(u64),
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Flushed { sessions: u64 },
    StoreUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Active(SessionState),
    Expired(SessionState),
    Revoked,
}

pub struct SessionTracker {
    store: Arc<dyn SharedStore>,
    prefix: String,
    lifetime: Duration,
    active_set_ttl_secs: u64,
    local: Mutex<HashMap<String, SessionState>>,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SharedStore>, prefix: &str, config: &SessionConfig) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            lifetime: Duration::minutes(config.lifetime_minutes),
            active_set_ttl_secs: config.active_set_ttl_seconds,
            local: Mutex::new(HashMap::new()),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}session:{}", self.prefix, session_id)
    }

    fn active_set_key(&self) -> String {
        format!("{}active_sessions", self.prefix)
    }

    fn record_ttl_secs(&self) -> u64 {
        (self.lifetime.num_seconds().max(1) as u64) * 2
    }

    fn remember(&self, state: &SessionState) {
        if let Ok(mut local) = self.local.lock() {
            local.insert(state.session_id.clone(), state.clone());
        }
    }

    fn forget(&self, session_id: &str) {
        if let Ok(mut local) = self.local.lock() {
            local.remove(session_id);
        }
    }

    fn evict_stale(&self, now: DateTime<Utc>) {
        let horizon = self.lifetime * 2;
        if let Ok(mut local) = self.local.lock() {
            local.retain(|_, s| s.last_activity.map_or(false, |at| now - at <= horizon));
        }
    }

    pub async fn start(&self, identity_id: i64) -> SessionState {
        self.start_at(identity_id, Utc::now()).await
    }

    pub async fn start_at(&self, identity_id: i64, now: DateTime<Utc>) -> SessionState {
        self.evict_stale(now);
        let mut state = SessionState {
            session_id: Uuid::new_v4().to_string(),
            identity_id,
            last_activity: None,
        };
        self.touch_at(&mut state, now).await;
        tracing::info!(identity_id, "Session started");
        state
    }

    pub async fn touch(&self, state: &mut SessionState) {
        self.touch_at(state, Utc::now()).await
    }

    /// Refreshes the activity timestamp. The local copy always updates; the
    /// shared record and active-set membership only when the store answers.
    pub async fn touch_at(&self, state: &mut SessionState, now: DateTime<Utc>) {
        state.last_activity = Some(now);
        self.remember(state);

        let record = SessionRecord {
            identity_id: state.identity_id,
            last_activity: now,
        };
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode session record");
                return;
            }
        };

        if let Err(e) = self
            .store
            .set_ex(
                &self.session_key(&state.session_id),
                &payload,
                self.record_ttl_secs(),
            )
            .await
        {
            store_unavailable("session_touch", &e);
            return;
        }

        let member = format!("{}:{}", state.identity_id, state.session_id);
        if let Err(e) = self
            .store
            .add_to_set(&self.active_set_key(), &member, self.active_set_ttl_secs)
            .await
        {
            store_unavailable("session_active_set", &e);
        }
    }

    fn status_of(&self, last_activity: Option<DateTime<Utc>>, now: DateTime<Utc>) -> SessionStatus {
        match last_activity {
            Some(at) if now - at > self.lifetime => SessionStatus::Expired,
            _ => SessionStatus::Active,
        }
    }

    pub async fn validate(&self, state: &SessionState) -> SessionStatus {
        self.validate_at(state, Utc::now()).await
    }

    /// Lazy expiry: a record older than the lifetime counts as expired even
    /// while it still exists in the store.
    pub async fn validate_at(&self, state: &SessionState, now: DateTime<Utc>) -> SessionStatus {
        match self.fetch(&state.session_id).await {
            Ok(Some(record)) if record.identity_id == state.identity_id => {
                self.status_of(Some(record.last_activity), now)
            }
            Ok(_) => SessionStatus::Revoked,
            Err(()) => self.status_of(state.last_activity, now),
        }
    }

    pub async fn is_expired(&self, state: &SessionState) -> bool {
        self.validate(state).await != SessionStatus::Active
    }

    /// Resolves an opaque session id (from the cookie) to its state.
    pub async fn lookup(&self, session_id: &str) -> SessionLookup {
        self.lookup_at(session_id, Utc::now()).await
    }

    pub async fn lookup_at(&self, session_id: &str, now: DateTime<Utc>) -> SessionLookup {
        let state = match self.fetch(session_id).await {
            Ok(Some(record)) => SessionState {
                session_id: session_id.to_string(),
                identity_id: record.identity_id,
                last_activity: Some(record.last_activity),
            },
            Ok(None) => {
                self.forget(session_id);
                return SessionLookup::Revoked;
            }
            Err(()) => {
                let cached = self
                    .local
                    .lock()
                    .ok()
                    .and_then(|local| local.get(session_id).cloned());
                match cached {
                    Some(state) => state,
                    None => return SessionLookup::Revoked,
                }
            }
        };

        match self.status_of(state.last_activity, now) {
            SessionStatus::Active => SessionLookup::Active(state),
            _ => SessionLookup::Expired(state),
        }
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>, ()> {
        match self.store.get(&self.session_key(session_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable session record");
                    Ok(None)
                }
            },
            Ok(None) => Ok(None),
            Err(e) => {
                store_unavailable("session_fetch", &e);
                Err(())
            }
        }
    }

    /// Removes a single session. The active set is not decremented.
    pub async fn end(&self, state: &SessionState) {
        self.forget(&state.session_id);
        if let Err(e) = self
            .store
            .delete(&[self.session_key(&state.session_id)])
            .await
        {
            store_unavailable("session_end", &e);
        }
        tracing::info!(identity_id = state.identity_id, "Session ended");
    }

    pub async fn active_count(&self) -> ActiveSessionCount {
        match self.store.set_cardinality(&self.active_set_key()).await {
            Ok(count) => ActiveSessionCount::Approximate(count),
            Err(e) => {
                store_unavailable("session_active_count", &e);
                ActiveSessionCount::Unavailable
            }
        }
    }

    /// Deletes every session record plus the active set. Idempotent; safe on
    /// an empty or unreachable store.
    pub async fn flush_all(&self) -> FlushOutcome {
        if let Ok(mut local) = self.local.lock() {
            local.clear();
        }

        let pattern = format!("{}session:", self.prefix);
        let keys = match self.store.scan_prefix(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                store_unavailable("session_flush", &e);
                return FlushOutcome::StoreUnavailable;
            }
        };

        let sessions = match self.store.delete(&keys).await {
            Ok(n) => n,
            Err(e) => {
                store_unavailable("session_flush", &e);
                return FlushOutcome::StoreUnavailable;
            }
        };

        if let Err(e) = self.store.delete(&[self.active_set_key()]).await {
            store_unavailable("session_flush", &e);
            return FlushOutcome::StoreUnavailable;
        }

        tracing::warn!(sessions, "All sessions flushed");
        FlushOutcome::Flushed { sessions }
    }
}
