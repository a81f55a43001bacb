use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::services::store::{KeyTtl, SharedStore, StoreError};

const BLOCKED_MARKER: &str = "blocked";

/// Result of a throttle check. `Unknown` means the shared store could not be
/// consulted; whether that admits the request is decided by
/// [`RateLimitStatus::permits_login`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitStatus {
    Allowed,
    Blocked { retry_after_secs: u64 },
    Unknown,
}

impl RateLimitStatus {
    /// Login throttling fails open: an unreachable store never locks users out.
    pub fn permits_login(&self) -> bool {
        !matches!(self, RateLimitStatus::Blocked { .. })
    }

    /// Either side blocking is enough to deny; the longer cooldown wins.
    pub fn combine(self, other: RateLimitStatus) -> RateLimitStatus {
        use RateLimitStatus::*;
        match (self, other) {
            (Blocked { retry_after_secs: a }, Blocked { retry_after_secs: b }) => Blocked {
                retry_after_secs: a.max(b),
            },
            (blocked @ Blocked { .. }, _) | (_, blocked @ Blocked { .. }) => blocked,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Allowed, Allowed) => Allowed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRecord {
    Recorded { attempts: u32, now_blocked: bool },
    StoreUnavailable,
}

/// Throttles repeated credential failures per identifier (client address or
/// account name) through counters in the shared store.
#[derive(Clone)]
pub struct LoginRateLimiter {
    store: Arc<dyn SharedStore>,
    prefix: String,
    max_attempts: u32,
    cooldown_secs: u64,
}

impl LoginRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, prefix: &str, config: &RateLimitConfig) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            max_attempts: config.max_attempts,
            cooldown_secs: config.cooldown_seconds,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}ratelimit:{}", self.prefix, identifier)
    }

    pub async fn check(&self, identifier: &str) -> RateLimitStatus {
        let key = self.key(identifier);

        let value = match self.store.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                store_unavailable("rate_limit_check", &e);
                return RateLimitStatus::Unknown;
            }
        };

        let blocking = match value.as_deref() {
            None => false,
            Some(BLOCKED_MARKER) => true,
            Some(count) => count
                .parse::<u64>()
                .map(|c| c >= u64::from(self.max_attempts))
                .unwrap_or(false),
        };

        if !blocking {
            return RateLimitStatus::Allowed;
        }

        let retry_after_secs = match self.store.ttl(&key).await {
            Ok(KeyTtl::Missing) => return RateLimitStatus::Allowed,
            Ok(KeyTtl::Expires(secs)) => secs.max(1),
            Ok(KeyTtl::Persistent) => {
                // Counters always carry a TTL; restore one if it was lost.
                if let Err(e) = self.store.expire(&key, self.cooldown_secs).await {
                    store_unavailable("rate_limit_expire", &e);
                }
                self.cooldown_secs
            }
            Err(e) => {
                store_unavailable("rate_limit_ttl", &e);
                self.cooldown_secs
            }
        };

        metrics::counter!("login_blocked_total").increment(1);
        tracing::info!(identifier = %identifier, retry_after_secs, "Login attempt throttled");
        RateLimitStatus::Blocked { retry_after_secs }
    }

    /// Checks client address and account name together.
    pub async fn check_login(&self, client: &str, username: &str) -> RateLimitStatus {
        let by_client = self.check(client).await;
        let by_user = self.check(username).await;
        by_client.combine(by_user)
    }

    pub async fn record_failure(&self, identifier: &str) -> FailureRecord {
        let key = self.key(identifier);

        match self.store.get(&key).await {
            // Another failure while blocked restarts the cooldown.
            Ok(Some(value)) if value == BLOCKED_MARKER => {
                return self.restart_block(&key).await;
            }
            Ok(_) => {}
            Err(e) => {
                store_unavailable("rate_limit_record", &e);
                return FailureRecord::StoreUnavailable;
            }
        }

        let count = match self.store.incr_with_expiry(&key, self.cooldown_secs).await {
            Ok(count) => count,
            // The store rejects INCR on the marker: another worker blocked
            // this identifier after the read above.
            Err(StoreError::Command(reason)) => {
                tracing::debug!(
                    identifier = %identifier,
                    reason = %reason,
                    "Counter already replaced by block marker"
                );
                return self.restart_block(&key).await;
            }
            Err(e) => {
                store_unavailable("rate_limit_record", &e);
                return FailureRecord::StoreUnavailable;
            }
        };

        metrics::counter!("login_failures_recorded_total").increment(1);
        let attempts = u32::try_from(count.max(0)).unwrap_or(u32::MAX);

        if attempts < self.max_attempts {
            return FailureRecord::Recorded {
                attempts,
                now_blocked: false,
            };
        }

        if let Err(e) = self
            .store
            .set_ex(&key, BLOCKED_MARKER, self.cooldown_secs)
            .await
        {
            // The counter itself already denies at this count.
            store_unavailable("rate_limit_block", &e);
        }

        tracing::warn!(identifier = %identifier, attempts, "Identifier blocked after repeated failures");
        FailureRecord::Recorded {
            attempts,
            now_blocked: true,
        }
    }

    async fn restart_block(&self, key: &str) -> FailureRecord {
        match self.store.expire(key, self.cooldown_secs).await {
            Ok(_) => FailureRecord::Recorded {
                attempts: self.max_attempts,
                now_blocked: true,
            },
            Err(e) => {
                store_unavailable("rate_limit_record", &e);
                FailureRecord::StoreUnavailable
            }
        }
    }

    pub async fn clear(&self, identifier: &str) {
        if let Err(e) = self.store.delete(&[self.key(identifier)]).await {
            store_unavailable("rate_limit_clear", &e);
        }
    }

    /// Current TTL of the identifier's counter, zero when absent or unreadable.
    pub async fn remaining_cooldown(&self, identifier: &str) -> u64 {
        match self.store.ttl(&self.key(identifier)).await {
            Ok(ttl) => ttl.remaining_secs(),
            Err(e) => {
                store_unavailable("rate_limit_ttl", &e);
                0
            }
        }
    }
}

pub(crate) fn store_unavailable(operation: &'static str, err: &StoreError) {
    metrics::counter!("shared_store_unavailable_total", "operation" => operation).increment(1);
    tracing::warn!(operation, error = %err, "Shared store call failed, degrading");
}
