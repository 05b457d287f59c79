//! Git subprocess wrapper.
//!
//! Git operations are opaque to the gateway: clone, fast-forward pull and
//! commit shell out to the `git` binary and report stderr on failure. The
//! trait exists so repo-sync logic can run against a fake in tests.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Opaque git operations against a local working directory.
#[async_trait]
pub trait GitShell: Send + Sync {
    /// Clone `remote` into `dest`.
    async fn clone_repo(&self, remote: &str, dest: &Path) -> Result<()>;

    /// Fast-forward-only pull inside `workdir`.
    async fn pull(&self, workdir: &Path) -> Result<()>;

    /// Stage everything and commit inside `workdir`.
    async fn commit(&self, workdir: &Path, message: &str) -> Result<()>;
}

/// [`GitShell`] backed by the system `git` binary.
pub struct SystemGit;

impl SystemGit {
    async fn run(args: &[&str], cwd: Option<&Path>) -> Result<()> {
        debug!(args = ?args, cwd = ?cwd, "git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Upstream(format!("failed to spawn git: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Upstream(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl GitShell for SystemGit {
    async fn clone_repo(&self, remote: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        Self::run(&["clone", "--quiet", remote, dest_str.as_ref()], None).await
    }

    async fn pull(&self, workdir: &Path) -> Result<()> {
        Self::run(&["pull", "--quiet", "--ff-only"], Some(workdir)).await
    }

    async fn commit(&self, workdir: &Path, message: &str) -> Result<()> {
        Self::run(&["add", "--all"], Some(workdir)).await?;
        Self::run(&["commit", "--quiet", "-m", message], Some(workdir)).await
    }
}
