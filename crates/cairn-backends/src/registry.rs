//! Registry of available task backends.

use std::sync::Arc;

use crate::backend::TaskBackend;

type BackendList = Arc<Vec<Arc<dyn TaskBackend>>>;

/// Registry for looking up backends by name.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: BackendList,
}

impl BackendRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: Arc::new(Vec::new()),
        }
    }

    /// Add a backend to the registry
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TaskBackend>) -> Self {
        Arc::make_mut(&mut self.backends).push(backend);
        self
    }

    /// Get a backend by name, if it exists
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskBackend>> {
        self.backends
            .iter()
            .find(|backend| backend.name() == name)
            .cloned()
    }

    /// Names of all registered backends
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    /// Get number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
