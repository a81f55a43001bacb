//! Client for the shared key-value store.
//!
//! Every request-handling worker coordinates exclusively through this store:
//! rate-limit counters, session records and the maintenance flag all live
//! here. The store may be unreachable at any moment, so every operation
//! returns a [`StoreError`] instead of panicking or blocking, and every call
//! is bounded by a short timeout.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::RedisConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, dropped, or timed out.
    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected the command.
    #[error("shared store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(u64),
}

impl KeyTtl {
    /// Seconds left, floored at zero. Missing and persistent keys report zero.
    pub fn remaining_secs(self) -> u64 {
        match self {
            KeyTtl::Expires(secs) => secs,
            KeyTtl::Missing | KeyTtl::Persistent => 0,
        }
    }

    fn from_redis(raw: i64) -> Self {
        match raw {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            n if n < 0 => KeyTtl::Missing,
            n => KeyTtl::Expires(n as u64),
        }
    }
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Increment a counter and (re)apply its TTL as one atomic unit, so no
    /// other worker can observe the incremented value without an expiry.
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Add a member and reset the set's rolling TTL atomically.
    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError>;

    /// Returns the number of keys actually removed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Redis-backed store. Connects lazily and re-establishes the connection
/// on demand, so an outage at startup only degrades requests.
pub struct RedisStore {
    client: Client,
    manager: RwLock<Option<ConnectionManager>>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

const SCAN_BATCH: usize = 1000;

impl RedisStore {
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.clone())
            .map_err(|e| StoreError::Command(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            manager: RwLock::new(None),
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut guard = self.manager.write().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        tracing::info!("Connecting to Redis");
        let manager = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_connection_manager(),
        )
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "connect timed out after {}ms",
                self.connect_timeout.as_millis()
            ))
        })??;

        tracing::info!("Successfully connected to Redis");
        *guard = Some(manager.clone());
        Ok(manager)
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut + Send,
        Fut: Future<Output = redis::RedisResult<T>> + Send,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.operation_timeout, f(conn)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{} timed out after {}ms",
                operation,
                self.operation_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.run("ping", |mut conn| async move {
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run("get", |mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.run("set", |mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.run("set_ex", |mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        let (count,): (i64,) = self
            .run("incr_with_expiry", |mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        self.run("expire", |mut conn| async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let raw: i64 = self
            .run("ttl", |mut conn| async move {
                redis::cmd("TTL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(KeyTtl::from_redis(raw))
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.run("add_to_set", |mut conn| async move {
            redis::pipe()
                .atomic()
                .cmd("SADD")
                .arg(key)
                .arg(member)
                .ignore()
                .cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        self.run("set_cardinality", |mut conn| async move {
            redis::cmd("SCARD").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run("delete", |mut conn| async move {
            redis::cmd("DEL").arg(keys).query_async(&mut conn).await
        })
        .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let pattern = pattern.as_str();
            let (next, batch): (u64, Vec<String>) = self
                .run("scan_prefix", |mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[derive(Debug, Clone)]
enum MockValue {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct MockEntry {
    value: MockValue,
    expires_at: Option<Instant>,
}

impl MockEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory store with TTL semantics on the tokio clock, so tests can use
/// `tokio::time::pause` / `advance`. `set_available(false)` simulates an outage.
pub struct MockStore {
    entries: Mutex<HashMap<String, MockEntry>>,
    available: AtomicBool,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys, for assertions.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, MockEntry>, Instant) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store offline".to_string()));
        }
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Command(format!("mock store mutex poisoned: {}", e)))?;
        entries.retain(|_, entry| entry.is_live(now));
        f(&mut entries, now)
    }
}

fn deadline(now: Instant, ttl_secs: u64) -> Option<Instant> {
    Some(now + Duration::from_secs(ttl_secs))
}

#[async_trait]
impl SharedStore for MockStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_entries(|_, _| Ok(()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(None),
            Some(MockEntry {
                value: MockValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
        })
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_entries(|entries, _| {
            entries.insert(
                key.to_string(),
                MockEntry {
                    value: MockValue::Str(value.to_string()),
                    expires_at: None,
                },
            );
            Ok(())
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.with_entries(|entries, now| {
            entries.insert(
                key.to_string(),
                MockEntry {
                    value: MockValue::Str(value.to_string()),
                    expires_at: deadline(now, ttl_secs),
                },
            );
            Ok(())
        })
    }

    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        self.with_entries(|entries, now| {
            let current = match entries.get(key) {
                None => 0,
                Some(MockEntry {
                    value: MockValue::Str(s),
                    ..
                }) => s.parse::<i64>().map_err(|_| {
                    StoreError::Command("value is not an integer or out of range".to_string())
                })?,
                Some(_) => {
                    return Err(StoreError::Command(
                        "WRONGTYPE Operation against a key holding the wrong kind of value"
                            .to_string(),
                    ))
                }
            };
            let next = current + 1;
            entries.insert(
                key.to_string(),
                MockEntry {
                    value: MockValue::Str(next.to_string()),
                    expires_at: deadline(now, ttl_secs),
                },
            );
            Ok(next)
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        self.with_entries(|entries, now| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = deadline(now, ttl_secs);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.with_entries(|entries, now| {
            Ok(match entries.get(key) {
                None => KeyTtl::Missing,
                Some(MockEntry {
                    expires_at: None, ..
                }) => KeyTtl::Persistent,
                Some(MockEntry {
                    expires_at: Some(at),
                    ..
                }) => {
                    let left = at.saturating_duration_since(now);
                    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                    KeyTtl::Expires(secs)
                }
            })
        })
    }

    async fn add_to_set(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError> {
        self.with_entries(|entries, now| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| MockEntry {
                value: MockValue::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                MockValue::Set(members) => {
                    members.insert(member.to_string());
                }
                MockValue::Str(_) => {
                    return Err(StoreError::Command(
                        "WRONGTYPE Operation against a key holding the wrong kind of value"
                            .to_string(),
                    ))
                }
            }
            entry.expires_at = deadline(now, ttl_secs);
            Ok(())
        })
    }

    async fn set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        self.with_entries(|entries, _| match entries.get(key) {
            None => Ok(0),
            Some(MockEntry {
                value: MockValue::Set(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(StoreError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
        })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.with_entries(|entries, _| {
            Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_entries(|entries, _| {
            Ok(entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}
