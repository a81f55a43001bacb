use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::executor::{CommandExecutor, ToolError};
use super::target::PgConnection;
use crate::config::BackupConfig;

/// External dump/restore tooling.
#[async_trait]
pub trait BackupTool: Send + Sync {
    async fn dump(&self, conn: &PgConnection, output: &Path) -> Result<(), ToolError>;

    async fn restore(&self, conn: &PgConnection, input: &Path) -> Result<(), ToolError>;
}

/// `pg_dump` writes plain SQL directly to the artifact path; `psql` replays
/// it in a single transaction and stops on the first error.
pub struct PgTools {
    pg_dump_bin: String,
    psql_bin: String,
    dump_executor: CommandExecutor,
    restore_executor: CommandExecutor,
}

impl PgTools {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            pg_dump_bin: config.pg_dump_bin.clone(),
            psql_bin: config.psql_bin.clone(),
            dump_executor: CommandExecutor::new(Duration::from_secs(config.dump_timeout_seconds)),
            restore_executor: CommandExecutor::new(Duration::from_secs(
                config.restore_timeout_seconds,
            )),
        }
    }

    fn connection_args(conn: &PgConnection) -> Vec<String> {
        vec![
            "-h".to_string(),
            conn.host.clone(),
            "-p".to_string(),
            conn.port.to_string(),
            "-U".to_string(),
            conn.user.clone(),
            "-d".to_string(),
            conn.database.clone(),
        ]
    }

    fn dump_args(conn: &PgConnection, output: &Path) -> Vec<String> {
        let mut args = Self::connection_args(conn);
        args.extend([
            "-f".to_string(),
            output.display().to_string(),
            "--no-owner".to_string(),
            "--no-acl".to_string(),
            "--clean".to_string(),
            "--if-exists".to_string(),
        ]);
        args
    }

    fn restore_args(conn: &PgConnection, input: &Path) -> Vec<String> {
        let mut args = vec!["-X".to_string()];
        args.extend(Self::connection_args(conn));
        args.extend([
            "-f".to_string(),
            input.display().to_string(),
            "-v".to_string(),
            "ON_ERROR_STOP=1".to_string(),
            "--single-transaction".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl BackupTool for PgTools {
    async fn dump(&self, conn: &PgConnection, output: &Path) -> Result<(), ToolError> {
        let args = Self::dump_args(conn, output);
        match &conn.password {
            Some(password) => {
                self.dump_executor
                    .execute(
                        &self.pg_dump_bin,
                        &args,
                        &[("PGPASSWORD", password.expose_secret().as_str())],
                    )
                    .await
            }
            None => self.dump_executor.execute(&self.pg_dump_bin, &args, &[]).await,
        }
    }

    async fn restore(&self, conn: &PgConnection, input: &Path) -> Result<(), ToolError> {
        let args = Self::restore_args(conn, input);
        match &conn.password {
            Some(password) => {
                self.restore_executor
                    .execute(
                        &self.psql_bin,
                        &args,
                        &[("PGPASSWORD", password.expose_secret().as_str())],
                    )
                    .await
            }
            None => self.restore_executor.execute(&self.psql_bin, &args, &[]).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Dump(PathBuf),
    Restore(PathBuf),
}

/// Scriptable tool double. A successful dump writes a small SQL file so the
/// artifact shows up in listings.
#[derive(Default)]
pub struct MockBackupTool {
    calls: Mutex<Vec<ToolCall>>,
    fail_dump: AtomicBool,
    fail_restore: AtomicBool,
}

impl MockBackupTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_dump(&self, fail: bool) {
        self.fail_dump.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restore(&self, fail: bool) {
        self.fail_restore.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: ToolCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl BackupTool for MockBackupTool {
    async fn dump(&self, _conn: &PgConnection, output: &Path) -> Result<(), ToolError> {
        self.push(ToolCall::Dump(output.to_path_buf()));
        if self.fail_dump.load(Ordering::SeqCst) {
            // Leave a partial file behind, as a real dump tool would.
            let _ = tokio::fs::write(output, b"-- partial").await;
            return Err(ToolError::Failed {
                program: "pg_dump".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "connection to server failed".to_string(),
            });
        }
        tokio::fs::write(output, b"-- PostgreSQL database dump\n")
            .await
            .map_err(|e| ToolError::Spawn {
                program: "pg_dump".to_string(),
                message: e.to_string(),
            })
    }

    async fn restore(&self, _conn: &PgConnection, input: &Path) -> Result<(), ToolError> {
        self.push(ToolCall::Restore(input.to_path_buf()));
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(ToolError::Failed {
                program: "psql".to_string(),
                status: "exit status: 3".to_string(),
                stderr: "ERROR:  syntax error at or near \"garbage\"".to_string(),
            });
        }
        Ok(())
    }
}
