//! Git working tree access
//!
//! The pipeline talks to git through [`GitOps`]; [`GitCli`] shells out to the
//! `git` binary through the sandbox command runner.

use async_trait::async_trait;

use abforge_core::error::Result;
use abforge_core::GitError;
use abforge_sandbox::{CommandRunner, ExecutionResult};

/// Position of the local branch relative to its upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NoUpstream,
    Tracking { ahead: u32, behind: u32 },
}

impl SyncState {
    pub fn in_sync(&self) -> bool {
        matches!(self, Self::Tracking { ahead: 0, behind: 0 })
    }
}

#[async_trait]
pub trait GitOps: Send + Sync {
    async fn current_branch(&self) -> Result<String>;

    async fn branch_exists(&self, name: &str) -> Result<bool>;

    async fn checkout(&self, name: &str) -> Result<()>;

    /// Fast-forward `branch` from `origin`
    async fn pull(&self, branch: &str) -> Result<()>;

    /// Create `name` from HEAD and switch to it
    async fn create_branch(&self, name: &str) -> Result<()>;

    async fn stage_all(&self) -> Result<()>;

    async fn commit(&self, message: &str) -> Result<()>;

    /// `git push -u origin <branch>`
    async fn push_upstream(&self, branch: &str) -> Result<()>;

    async fn has_uncommitted_changes(&self) -> Result<bool>;

    async fn sync_state(&self) -> Result<SyncState>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    runner: CommandRunner,
}

impl GitCli {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn exec(&self, args: &[&str]) -> Result<ExecutionResult> {
        self.runner
            .run("git", args)
            .await
            .map_err(|e| GitError::Spawn(e.to_string()).into())
    }

    /// Run and require a zero exit
    async fn git(&self, args: &[&str]) -> Result<String> {
        let result = self.exec(args).await?;
        if !result.success {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(result.stdout.trim().to_string())
    }
}

#[async_trait]
impl GitOps for GitCli {
    async fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", name);
        let result = self
            .exec(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(result.success)
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        tracing::info!("checking out {}", name);
        self.git(&["checkout", name]).await.map(|_| ())
    }

    async fn pull(&self, branch: &str) -> Result<()> {
        tracing::info!("pulling {} from origin", branch);
        self.git(&["pull", "--ff-only", "origin", branch])
            .await
            .map(|_| ())
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        tracing::info!("creating branch {}", name);
        self.git(&["checkout", "-b", name]).await.map(|_| ())
    }

    async fn stage_all(&self) -> Result<()> {
        self.git(&["add", "-A"]).await.map(|_| ())
    }

    async fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-m", message]).await.map(|_| ())
    }

    async fn push_upstream(&self, branch: &str) -> Result<()> {
        tracing::info!("pushing {} to origin", branch);
        self.git(&["push", "-u", "origin", branch]).await.map(|_| ())
    }

    async fn has_uncommitted_changes(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    async fn sync_state(&self) -> Result<SyncState> {
        let result = self
            .exec(&["rev-list", "--left-right", "--count", "HEAD...@{u}"])
            .await?;
        if !result.success {
            return Ok(SyncState::NoUpstream);
        }
        let mut counts = result
            .stdout
            .split_whitespace()
            .map(|n| n.parse::<u32>().unwrap_or(0));
        Ok(SyncState::Tracking {
            ahead: counts.next().unwrap_or(0),
            behind: counts.next().unwrap_or(0),
        })
    }
}
