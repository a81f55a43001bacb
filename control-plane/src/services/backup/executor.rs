use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error.
const STDERR_LIMIT: usize = 2000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} is not installed or not on PATH")]
    NotInstalled { program: String },

    #[error("failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} timed out after {timeout_secs} seconds")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ToolError {
    /// Diagnostic text suitable for the caller.
    pub fn diagnostic(&self) -> String {
        self.to_string()
    }
}

/// Runs an external program to completion under a hard timeout. The child is
/// killed if the timeout fires.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `envs` values are passed to the child only and never logged.
    pub async fn execute(
        &self,
        program: &str,
        args: &[String],
        envs: &[(&str, &str)],
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(envs.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            program = %program,
            args = ?args,
            timeout_secs = self.timeout.as_secs(),
            "Executing command"
        );

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled {
                    program: program.to_string(),
                }
            } else {
                ToolError::Spawn {
                    program: program.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::error!(program = %program, timeout_secs = self.timeout.as_secs(), "Command timed out");
                ToolError::TimedOut {
                    program: program.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            })?
            .map_err(|e| ToolError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let excerpt: String = stderr.chars().take(STDERR_LIMIT).collect();
            tracing::error!(
                program = %program,
                status = %output.status,
                stderr = %excerpt,
                "Command failed"
            );
            return Err(ToolError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: excerpt,
            });
        }

        tracing::info!(program = %program, "Command succeeded");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn success_returns_ok() {
        let exec = CommandExecutor::new(Duration::from_secs(5));
        assert!(exec.execute("sh", &sh("exit 0"), &[]).await.is_ok());
    }

    #[tokio::test]
    async fn failure_captures_stderr() {
        let exec = CommandExecutor::new(Duration::from_secs(5));
        match exec
            .execute("sh", &sh("echo 'relation missing' >&2; exit 3"), &[])
            .await
        {
            Err(ToolError::Failed { stderr, .. }) => assert_eq!(stderr, "relation missing"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn env_reaches_child() {
        let exec = CommandExecutor::new(Duration::from_secs(5));
        let result = exec
            .execute("sh", &sh("test \"$PGPASSWORD\" = secret"), &[("PGPASSWORD", "secret")])
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let exec = CommandExecutor::new(Duration::from_millis(200));
        assert!(matches!(
            exec.execute("sh", &sh("sleep 5"), &[]).await,
            Err(ToolError::TimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn missing_program_is_not_installed() {
        let exec = CommandExecutor::new(Duration::from_secs(1));
        assert!(matches!(
            exec.execute("definitely-not-a-real-binary-td", &[], &[]).await,
            Err(ToolError::NotInstalled { .. })
        ));
    }
}
