use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{AuditEntry, AuditRecord};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only storage for audit records. Implementations expose no update
/// or delete path.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn insert(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Newest first.
    async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<AuditRecord>, AuditError>;
}

#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor_id, actor_name, action, resource_type, resource_id, details, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.actor_id)
        .bind(&record.actor_name)
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.details)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<AuditRecord>, AuditError> {
        let records = sqlx::query_as::<_, AuditRecord>(
            r#"
            SELECT id, actor_id, actor_name, action, resource_type, resource_id, details, ip_address, user_agent, created_at
            FROM audit_logs
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

/// In-process sink for tests and for deployments without Postgres.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn insert(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink set to fail".to_string()));
        }
        self.records
            .lock()
            .map_err(|e| AuditError::Unavailable(format!("audit mutex poisoned: {}", e)))?
            .push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self
            .records
            .lock()
            .map_err(|e| AuditError::Unavailable(format!("audit mutex poisoned: {}", e)))?;
        Ok(records
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Writes one record and returns it once the sink has accepted it.
    pub async fn append(&self, entry: AuditEntry) -> Result<AuditRecord, AuditError> {
        let record = entry.into_record();
        self.sink.insert(&record).await?;
        tracing::info!(
            audit_id = %record.id,
            action = %record.action,
            actor_id = ?record.actor_id,
            "Audit record written"
        );
        Ok(record)
    }

    /// Append for callers whose primary effect has already committed: a sink
    /// failure is logged and counted, never propagated.
    pub async fn record(&self, entry: AuditEntry) -> Option<AuditRecord> {
        let action = entry.action.as_str();
        match self.append(entry).await {
            Ok(record) => Some(record),
            Err(e) => {
                metrics::counter!("audit_write_failures_total").increment(1);
                tracing::error!(action, error = %e, "Failed to write audit record");
                None
            }
        }
    }

    pub async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<AuditRecord>, AuditError> {
        self.sink.recent(limit, offset).await
    }
}
