//! Process-wide registry of in-flight progress handlers.

use dcd_core::{OperationError, ProgressHandler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry mapping client-chosen ids to live progress handlers.
///
/// Registration is idempotent per request lifetime: a second registration
/// under the same id is rejected so two clients cannot share a handler.
#[derive(Default)]
pub struct ProgressRegistry {
    handlers: Mutex<HashMap<String, Arc<ProgressHandler>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh handler under `id` for the duration of the
    /// returned guard.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
    ) -> dcd_core::Result<ProgressGuard> {
        let handler = Arc::new(ProgressHandler::new(id));
        let mut handlers = self.handlers.lock().expect("progress registry poisoned");
        if handlers.contains_key(id) {
            return Err(OperationError::InvalidRequest(format!(
                "Progress handler with id `{id}` has already been registered"
            )));
        }
        handlers.insert(id.to_string(), handler.clone());
        Ok(ProgressGuard {
            registry: self.clone(),
            handler,
        })
    }

    /// Look up a live handler.
    pub fn lookup(&self, id: &str) -> Option<Arc<ProgressHandler>> {
        self.handlers
            .lock()
            .expect("progress registry poisoned")
            .get(id)
            .cloned()
    }

    fn unregister(&self, id: &str) {
        self.handlers
            .lock()
            .expect("progress registry poisoned")
            .remove(id);
    }
}

/// Keeps a handler registered; unregisters on drop (including client
/// disconnects that abort the request future).
pub struct ProgressGuard {
    registry: Arc<ProgressRegistry>,
    handler: Arc<ProgressHandler>,
}

impl std::fmt::Debug for ProgressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressGuard")
            .field("handler_id", &self.handler.id())
            .finish()
    }
}

impl ProgressGuard {
    pub fn handler(&self) -> Arc<ProgressHandler> {
        self.handler.clone()
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.handler.id());
    }
}
