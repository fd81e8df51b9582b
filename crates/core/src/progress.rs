//! Progress reporting primitives.
//!
//! Long-running operations are parameterised by a [`ProgressSink`]; the RPC
//! surface exposes registered [`ProgressHandler`]s to polling clients.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Side-channel counting units of work.
///
/// Totals are set once known; progress is monotonic non-decreasing. `-1`
/// means unknown.
pub trait ProgressSink: Send + Sync {
    fn set_total(&self, total: i64);
    fn set_progress(&self, progress: i64);
}

/// Serialisable snapshot of a progress handler, the RPC response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressReport {
    pub id: String,
    pub progress: i64,
    pub total: i64,
}

/// Shared progress state for one in-flight operation.
///
/// Writers bump the counters through [`ProgressSink`]; readers take
/// [`snapshot`](Self::snapshot)s concurrently without locking.
#[derive(Debug)]
pub struct ProgressHandler {
    id: String,
    progress: AtomicI64,
    total: AtomicI64,
}

impl ProgressHandler {
    /// Create a handler with the client-chosen id; counters start unknown.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            progress: AtomicI64::new(-1),
            total: AtomicI64::new(-1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> ProgressReport {
        ProgressReport {
            id: self.id.clone(),
            progress: self.progress.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}

impl ProgressSink for ProgressHandler {
    fn set_total(&self, total: i64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_progress(&self, progress: i64) {
        self.progress.store(progress, Ordering::Relaxed);
    }
}
