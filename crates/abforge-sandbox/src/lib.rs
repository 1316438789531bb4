//! abforge Sandbox - subprocess execution for git, build and lint commands
//!
//! Every external command the pipeline runs goes through [`CommandRunner`], which
//! pins the working directory, captures output and enforces an optional timeout.
//! [`Sandbox`] is a throwaway workspace used by tests and dry runs.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;

/// Outcome of one command
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Last non-empty stderr line, falling back to stdout
    pub fn summary(&self) -> String {
        let pick = |text: &str| {
            text.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }
}

/// Runs commands inside a fixed working directory
#[derive(Debug, Clone)]
pub struct CommandRunner {
    root: PathBuf,
}

impl CommandRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `cmd args...` to completion
    pub async fn run(&self, cmd: &str, args: &[&str]) -> Result<ExecutionResult> {
        self.run_with_timeout(cmd, args, None).await
    }

    /// Run `cmd args...`, killing it once `timeout` elapses
    pub async fn run_with_timeout(
        &self,
        cmd: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        tracing::debug!("running `{} {}` in {}", cmd, args.join(" "), self.root.display());

        let started = Instant::now();
        let child = Command::new(cmd)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch `{}`", cmd))?;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    tracing::warn!("`{}` timed out after {}ms", cmd, limit.as_millis());
                    return Ok(ExecutionResult {
                        success: false,
                        stdout: String::new(),
                        stderr: format!("timed out after {}ms", limit.as_millis()),
                        exit_code: -1,
                        timed_out: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        Ok(ExecutionResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            timed_out: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Run a whitespace-separated command line such as `npm run build`
    pub async fn run_command_line(
        &self,
        command_line: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let mut parts = command_line.split_whitespace();
        let cmd = parts
            .next()
            .with_context(|| format!("empty command line: {:?}", command_line))?;
        let args: Vec<&str> = parts.collect();
        self.run_with_timeout(cmd, &args, timeout).await
    }
}

/// Throwaway workspace, destroyed on drop
pub struct Sandbox {
    #[allow(dead_code)]
    temp_dir: TempDir,
    /// Root of the workspace
    pub root_path: PathBuf,
}

impl Sandbox {
    /// Create an empty workspace
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("abforge-sandbox-").tempdir()?;

        Ok(Self {
            root_path: temp_dir.path().to_path_buf(),
            temp_dir,
        })
    }

    /// Write files, creating parent directories
    pub fn prepare(&self, files: &[(PathBuf, String)]) -> Result<()> {
        for (path, content) in files {
            let full_path = self.root_path.join(path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, content)?;
        }
        Ok(())
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root_path.join(relative)
    }

    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(self.root_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sandbox_lifecycle() -> Result<()> {
        let sandbox = Sandbox::new()?;
        let files = vec![(
            PathBuf::from("scripts/hello.sh"),
            "echo 'Hello abforge'".to_string(),
        )];
        sandbox.prepare(&files)?;

        let res = sandbox.runner().run("sh", &["scripts/hello.sh"]).await?;
        assert!(res.success);
        assert_eq!(res.stdout.trim(), "Hello abforge");
        assert!(!res.timed_out);

        Ok(())
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() -> Result<()> {
        let sandbox = Sandbox::new()?;
        let res = sandbox
            .runner()
            .run("sh", &["-c", "echo broken >&2; exit 3"])
            .await?;

        assert!(!res.success);
        assert_eq!(res.exit_code, 3);
        assert_eq!(res.summary(), "broken");
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_kills_long_command() -> Result<()> {
        let sandbox = Sandbox::new()?;
        let res = sandbox
            .runner()
            .run_command_line("sleep 5", Some(Duration::from_millis(100)))
            .await?;

        assert!(res.timed_out);
        assert!(!res.success);
        assert!(res.duration_ms < 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let sandbox = Sandbox::new().unwrap();
        let res = sandbox
            .runner()
            .run("abforge-definitely-not-a-binary", &[])
            .await;
        assert!(res.is_err());
    }
}
