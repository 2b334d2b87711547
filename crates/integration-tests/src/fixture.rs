//! A disposable git remote seeded with an empty task subtree.
//!
//! Every test gets its own bare repository on the local filesystem plus as
//! many independent client state directories as it asks for, so multi-client
//! sync scenarios run without any network access.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context as _, Result, bail};
use cairn_backends::TaskService;
use cairn_core::CairnConfig;
use tempfile::TempDir;

/// Bare git remote on disk with `tasks/` seeded on `main`.
pub struct RemoteFixture {
    temp: TempDir,
    url: String,
}

impl RemoteFixture {
    /// Creates the bare remote and seeds `tasks/.gitkeep` on `main`.
    ///
    /// # Errors
    /// Returns an error if git is unavailable or any seeding step fails.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("create fixture temp dir")?;

        let bare = temp.path().join("remote.git");
        fs::create_dir_all(&bare).context("create bare repo dir")?;
        run_git(&bare, &["init", "--bare", "--initial-branch=main", "."])?;
        // Shallow blob-filtered clones need the filter capability enabled
        run_git(&bare, &["config", "uploadpack.allowfilter", "true"])?;
        let url = format!("file://{}", bare.display());

        let seed = temp.path().join("seed");
        fs::create_dir_all(seed.join("tasks")).context("create seed tree")?;
        fs::write(seed.join("tasks").join(".gitkeep"), "").context("write .gitkeep")?;
        run_git(&seed, &["init", "--initial-branch=main", "."])?;
        run_git(&seed, &["add", "."])?;
        run_git(
            &seed,
            &[
                "-c",
                "user.name=seed",
                "-c",
                "user.email=seed@localhost",
                "commit",
                "-m",
                "seed task data",
            ],
        )?;
        run_git(&seed, &["push", &url, "main"])?;
        tracing::debug!("Seeded test remote at {url}");

        Ok(Self { temp, url })
    }

    /// `file://` URL of the bare remote.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path of the bare repository itself.
    #[must_use]
    pub fn bare_path(&self) -> PathBuf {
        self.temp.path().join("remote.git")
    }

    /// Configuration pointing one named client at this remote, with its own
    /// state directory and short lock timings.
    #[must_use]
    pub fn config_for(&self, client: &str) -> CairnConfig {
        let mut config = CairnConfig::default();
        config.git.remote_url = Some(self.url.clone());
        config.workspace.state_dir = Some(self.state_root(client));
        config.locking.operation_timeout_secs = 10;
        config.locking.advisory_poll_ms = 25;
        config
    }

    /// Service for a named client.
    ///
    /// # Errors
    /// Returns an error if the service rejects the configuration.
    pub fn service_for(&self, client: &str) -> Result<TaskService> {
        Ok(TaskService::new(self.config_for(client))?)
    }

    /// Workspace checkout root for a named client.
    #[must_use]
    pub fn state_root(&self, client: &str) -> PathBuf {
        self.temp.path().join(format!("state-{client}"))
    }

    /// Path of the task state file inside a named client's checkout.
    #[must_use]
    pub fn tasks_file(&self, client: &str) -> PathBuf {
        self.state_root(client).join("tasks").join("tasks.json")
    }

    /// Subject line of the newest commit on the remote's `main`.
    ///
    /// # Errors
    /// Returns an error if the log cannot be read.
    pub fn latest_subject(&self) -> Result<String> {
        let subject = capture_git(&self.bare_path(), &["log", "-1", "--format=%s", "main"])?;
        Ok(subject.trim().to_owned())
    }

    /// Commit hash of `main` on the remote.
    ///
    /// # Errors
    /// Returns an error if the ref cannot be read.
    pub fn remote_head(&self) -> Result<String> {
        let head = capture_git(&self.bare_path(), &["rev-parse", "main"])?;
        Ok(head.trim().to_owned())
    }

    /// Installs a pre-receive hook that rejects every push while leaving
    /// fetches untouched.
    ///
    /// # Errors
    /// Returns an error if the hook cannot be written.
    pub fn block_pushes(&self) -> Result<()> {
        let hook = self.bare_path().join("hooks").join("pre-receive");
        fs::write(&hook, "#!/bin/sh\nexit 1\n").context("write pre-receive hook")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mut perms = fs::metadata(&hook).context("stat hook")?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&hook, perms).context("mark hook executable")?;
        }
        Ok(())
    }

    /// Removes the push-rejecting hook installed by [`Self::block_pushes`].
    ///
    /// # Errors
    /// Returns an error if the hook cannot be removed.
    pub fn allow_pushes(&self) -> Result<()> {
        fs::remove_file(self.bare_path().join("hooks").join("pre-receive"))
            .context("remove pre-receive hook")?;
        Ok(())
    }

    /// Renames the bare repository away so fetch and push fail until
    /// [`Self::restore_remote`] is called.
    ///
    /// # Errors
    /// Returns an error if the rename fails.
    pub fn break_remote(&self) -> Result<()> {
        fs::rename(self.bare_path(), self.temp.path().join("remote.gone"))
            .context("rename remote away")?;
        Ok(())
    }

    /// Undoes [`Self::break_remote`].
    ///
    /// # Errors
    /// Returns an error if the rename fails.
    pub fn restore_remote(&self) -> Result<()> {
        fs::rename(self.temp.path().join("remote.gone"), self.bare_path())
            .context("rename remote back")?;
        Ok(())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    capture_git(dir, args)?;
    Ok(())
}

fn capture_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {args:?}"))?;

    if !output.status.success() {
        bail!(
            "git {args:?} in {} failed: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
