//! Subprocess execution with a bounded wait.
//!
//! Each call spawns exactly one child process. Nothing is retried and no
//! state is shared between calls beyond the working directory, so one runner
//! can serve any number of concurrent calls.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ProcessError;

/// Default bound on how long a single subprocess may run.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs executables inside a fixed working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    working_directory: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(working_directory: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            working_directory: working_directory.into(),
            timeout,
        }
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Runs `program args…` and returns stdout with trailing whitespace trimmed.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Spawn`] if the executable cannot be started,
    /// [`ProcessError::Failure`] on a nonzero exit or when the timeout elapses.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String, ProcessError> {
        let stdout = self.run_bytes(program, args).await?;
        Ok(String::from_utf8_lossy(&stdout).trim_end().to_owned())
    }

    /// Like [`run`](Self::run) but returns stdout untouched.
    ///
    /// Used where the exact bytes matter, such as hashing file content.
    pub async fn run_bytes(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ProcessError> {
        tracing::debug!(
            program,
            ?args,
            cwd = %self.working_directory.display(),
            "spawning subprocess"
        );

        let child = Command::new(program)
            .args(args)
            .current_dir(&self.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out wait drops the child; make sure that also kills it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.to_owned(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ProcessError::Failure {
                    program: program.to_owned(),
                    exit_code: None,
                    stderr: err.to_string(),
                })
            }
            Err(_) => {
                return Err(ProcessError::Failure {
                    program: program.to_owned(),
                    exit_code: None,
                    stderr: format!("timed out after {}ms", self.timeout.as_millis()),
                })
            }
        };

        if !output.status.success() {
            return Err(ProcessError::Failure {
                program: program.to_owned(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(std::env::temp_dir(), DEFAULT_PROCESS_TIMEOUT)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn trims_trailing_whitespace_only() {
        let out = runner().run("printf", &["  hello\\n\\n  "]).await.unwrap();
        assert_eq!(out, "  hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_stderr() {
        let err = runner()
            .run("sh", &["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            ProcessError::Failure { exit_code, stderr, .. } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_failure() {
        let err = runner()
            .run("smilebin-definitely-not-installed", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_times_out() {
        let runner = ProcessRunner::new(std::env::temp_dir(), Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = runner.run("sleep", &["5"]).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            ProcessError::Failure { exit_code, stderr, .. } => {
                assert_eq!(exit_code, None);
                assert!(stderr.contains("timed out"), "stderr was {stderr:?}");
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }
}
