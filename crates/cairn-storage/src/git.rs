//! Git subprocess execution for the synced workspace.
//!
//! The store issues only clone, fetch, reset, add, commit, and push; no
//! history rewriting and no merges. Every invocation runs under a timeout,
//! and a timeout is a hard failure of that step.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cairn_core::{Error, Result};
use tokio::process::Command;
use tokio::time::timeout;

/// Runs git subprocesses rooted at a single checkout.
#[derive(Debug, Clone)]
pub struct GitRunner {
    root: PathBuf,
    command_timeout: Duration,
}

impl GitRunner {
    /// Creates a runner for the checkout at `root`.
    #[must_use]
    pub fn new(root: PathBuf, command_timeout: Duration) -> Self {
        Self {
            root,
            command_timeout,
        }
    }

    /// Root of the checkout this runner operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shallow, blob-filtered, sparse clone of `remote` into the root,
    /// restricted to `data_dir`, with a local committer identity.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if any git step fails or times out.
    pub async fn clone_shallow_sparse(
        &self,
        remote: &str,
        branch: &str,
        data_dir: &str,
    ) -> Result<()> {
        let parent = self.root.parent().ok_or_else(|| {
            Error::Other(format!(
                "Workspace root {} has no parent directory",
                self.root.display()
            ))
        })?;
        fs::create_dir_all(parent)?;

        let target = self
            .root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::Other(format!(
                    "Workspace root {} is not a valid directory name",
                    self.root.display()
                ))
            })?;

        self.exec(
            "clone",
            parent,
            &[
                "clone",
                "--depth=1",
                "--filter=blob:none",
                "--sparse",
                "--branch",
                branch,
                remote,
                target,
            ],
        )
        .await?;
        self.exec("sparse-checkout", &self.root, &["sparse-checkout", "set", data_dir])
            .await?;
        self.exec("config", &self.root, &["config", "user.name", "cairn"])
            .await?;
        self.exec(
            "config",
            &self.root,
            &["config", "user.email", "cairn@localhost"],
        )
        .await?;
        Ok(())
    }

    /// Fetches the latest commit of `branch` from origin (depth 1).
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] on network or remote failure.
    pub async fn fetch(&self, branch: &str) -> Result<()> {
        self.exec(
            "fetch",
            &self.root,
            &["fetch", "--depth=1", "origin", branch],
        )
        .await?;
        Ok(())
    }

    /// Hard-resets the working copy to `target` (a commit hash or
    /// `FETCH_HEAD`), discarding local changes.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if the reset fails.
    pub async fn reset_hard(&self, target: &str) -> Result<()> {
        self.exec("reset", &self.root, &["reset", "--hard", target])
            .await?;
        Ok(())
    }

    /// Stages all changes under `subtree`, including deletions.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if staging fails.
    pub async fn stage(&self, subtree: &str) -> Result<()> {
        self.exec("add", &self.root, &["add", "-A", "--", subtree])
            .await?;
        Ok(())
    }

    /// Whether anything is currently staged.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if the index cannot be read.
    pub async fn has_staged_changes(&self) -> Result<bool> {
        let staged = self
            .exec("diff", &self.root, &["diff", "--cached", "--name-only"])
            .await?;
        Ok(!staged.trim().is_empty())
    }

    /// Commits staged changes with `message`.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if the commit fails (including an empty
    /// index).
    pub async fn commit(&self, message: &str) -> Result<()> {
        self.exec("commit", &self.root, &["commit", "-m", message])
            .await?;
        Ok(())
    }

    /// Pushes HEAD to `branch` on origin.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] on rejection, network failure, or timeout.
    pub async fn push(&self, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:{branch}");
        self.exec("push", &self.root, &["push", "origin", &refspec])
            .await?;
        Ok(())
    }

    /// Commit hash of the current HEAD.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] if HEAD cannot be resolved.
    pub async fn head_commit(&self) -> Result<String> {
        let output = self
            .exec("rev-parse", &self.root, &["rev-parse", "HEAD"])
            .await?;
        Ok(output.trim().to_owned())
    }

    /// Commit hash of `branch` on origin, straight from the remote.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] on network failure or an unknown branch.
    pub async fn remote_head(&self, branch: &str) -> Result<String> {
        let output = self
            .exec("ls-remote", &self.root, &["ls-remote", "origin", branch])
            .await?;
        output
            .split_whitespace()
            .next()
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::GitSync {
                op: "ls-remote",
                detail: format!("origin has no branch {branch}"),
            })
    }

    /// Probes that the checkout's git metadata is readable.
    ///
    /// # Errors
    /// Returns [`Error::GitSync`] when the directory is not a usable
    /// checkout (missing metadata, unreadable index).
    pub async fn verify_checkout(&self) -> Result<()> {
        self.exec("rev-parse", &self.root, &["rev-parse", "--git-dir"])
            .await?;
        self.exec("status", &self.root, &["status", "--porcelain"])
            .await?;
        Ok(())
    }

    /// Runs one git subprocess in `dir` under the configured timeout,
    /// returning its stdout on success.
    async fn exec(&self, op: &'static str, dir: &Path, args: &[&str]) -> Result<String> {
        tracing::debug!("git {} (in {})", args.join(" "), dir.display());

        let output = timeout(
            self.command_timeout,
            Command::new("git").args(args).current_dir(dir).output(),
        )
        .await
        .map_err(|_| Error::GitSync {
            op,
            detail: format!("timed out after {}s", self.command_timeout.as_secs()),
        })??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(Error::GitSync {
                op,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}
