//! Workspace-root resolution for backend calls.

use std::path::{Path, PathBuf};

use crate::backend::{TaskBackend, WorkspaceKind};

/// Decides which directory a backend call operates against.
///
/// Stateless: resolution is a pure function of caller intent (an explicit
/// override), the backend's declared [`WorkspaceKind`], and a configured
/// fallback. Keeping this outside the backends keeps the managed workspace
/// optional rather than hard-wired into every one of them.
#[derive(Debug, Clone)]
pub struct BackendRouter {
    managed_root: PathBuf,
    fallback_root: PathBuf,
}

impl BackendRouter {
    /// Creates a router over the managed workspace data path and the
    /// fallback used when no other root can be determined.
    #[must_use]
    pub fn new(managed_root: PathBuf, fallback_root: PathBuf) -> Self {
        Self {
            managed_root,
            fallback_root,
        }
    }

    /// Resolves the root directory for one backend call.
    ///
    /// Order: explicit `override_path`, then the backend's kind (in-tree
    /// backends get the managed data path, external ones the caller's
    /// current directory), then the configured fallback.
    #[must_use]
    pub fn resolve_root(
        &self,
        backend: &dyn TaskBackend,
        override_path: Option<&Path>,
    ) -> PathBuf {
        if let Some(path) = override_path {
            return path.to_owned();
        }
        match backend.workspace_kind() {
            WorkspaceKind::InTree => self.managed_root.clone(),
            WorkspaceKind::External => {
                std::env::current_dir().unwrap_or_else(|_| self.fallback_root.clone())
            }
        }
    }
}
