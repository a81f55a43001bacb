pub mod admin;
pub mod audit;
pub mod backup;
pub mod directory;
pub mod login;
pub mod maintenance;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod store;

pub use admin::AdminService;
pub use audit::{AuditError, AuditLog, AuditSink, MemoryAuditSink, PgAuditSink};
pub use backup::BackupOrchestrator;
pub use directory::{IdentityDirectory, PgIdentityDirectory, StaticDirectory};
pub use login::{LoginService, LoginSuccess};
pub use maintenance::{MaintenanceGate, MaintenanceStatus};
pub use rate_limit::{FailureRecord, LoginRateLimiter, RateLimitStatus};
pub use session::{ActiveSessionCount, FlushOutcome, SessionLookup, SessionState, SessionStatus, SessionTracker};
pub use store::{KeyTtl, MockStore, RedisStore, SharedStore, StoreError};
