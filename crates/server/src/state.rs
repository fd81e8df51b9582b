//! Application state shared across handlers.

use crate::progress::ProgressRegistry;
use dcd_engine::System;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared server state: the configured systems keyed by repository path,
/// plus the progress registry.
#[derive(Clone)]
pub struct AppState {
    pub systems: Arc<HashMap<String, Arc<System>>>,
    pub progress: Arc<ProgressRegistry>,
}

impl AppState {
    pub fn new(systems: HashMap<String, Arc<System>>) -> Self {
        Self {
            systems: Arc::new(systems),
            progress: Arc::new(ProgressRegistry::new()),
        }
    }

    /// Find the system a request path addresses.
    pub fn system(&self, path: &str) -> Option<Arc<System>> {
        self.systems.get(path).cloned()
    }
}
