pub mod audit_record;
pub mod backup_artifact;
pub mod identity;

pub use audit_record::{Actor, AuditAction, AuditEntry, AuditRecord, RequestOrigin};
pub use backup_artifact::BackupArtifact;
pub use identity::{CredentialRecord, Identity, IdentityRow, Role};
