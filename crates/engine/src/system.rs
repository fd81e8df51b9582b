//! The per-repository facade: serialises edit/commit/update/get and the
//! periodic self-heal on one mutex, and guards the checkout state machine.

use crate::cache::ChunkCache;
use crate::commit::commit_workspace;
use crate::reconcile::update_workspace;
use crate::workspace::Workspace;
use bytes::Bytes;
use dcd_core::progress::ProgressSink;
use dcd_core::{OperationError, baseline_digest};
use dcd_store::RepoStore;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Cadence of the periodic reconciliation.
pub const SELF_HEAL_INTERVAL: Duration = Duration::from_secs(5);

/// A stream of archive chunks, as served by [`System::get`].
pub type ByteStream = Pin<Box<dyn Stream<Item = dcd_core::Result<Bytes>> + Send>>;

/// One managed repository: storage, cache and workspace behind a mutex.
///
/// Every operation, including the self-heal tick, holds the lock for its
/// full duration, so operations on a repository are totally ordered.
pub struct System {
    store: RepoStore,
    cache: ChunkCache,
    workspace: Workspace,
    lock: Arc<Mutex<()>>,
}

impl System {
    pub fn new(store: RepoStore, cache: ChunkCache, workspace: Workspace) -> Self {
        Self {
            store,
            cache,
            workspace,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Logical key of the repository this system manages.
    pub fn file(&self) -> &str {
        self.store.file()
    }

    /// Stream the published archive straight from storage.
    ///
    /// Neither the cache nor the workspace is touched. The system lock is
    /// held by the returned stream until it is drained or dropped.
    pub async fn get(
        &self,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> dcd_core::Result<ByteStream> {
        let guard = self.lock.clone().lock_owned().await;
        let hashes = self
            .store
            .get_hashes()
            .await
            .map_err(OperationError::internal)?;
        if let Some(p) = &progress {
            p.set_total(hashes.len() as i64);
            p.set_progress(0);
        }

        let store = self.store.clone();
        let stream = futures::stream::try_unfold(
            (guard, store, hashes, 0usize, progress),
            |(guard, store, hashes, idx, progress)| async move {
                if idx >= hashes.len() {
                    return Ok(None);
                }
                let data = store
                    .read_chunk(&hashes[idx])
                    .await
                    .map_err(OperationError::internal)?;
                if let Some(p) = &progress {
                    p.set_progress((idx + 1) as i64);
                }
                Ok(Some((
                    Bytes::from(data),
                    (guard, store, hashes, idx + 1, progress),
                )))
            },
        );
        Ok(Box::pin(stream))
    }

    /// Enter the edited state: reconcile, then plant the checkout marker.
    pub async fn edit(
        &self,
        force: bool,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> dcd_core::Result<()> {
        let _guard = self.lock.lock().await;

        let marker = self.workspace.get_checkout().await?;
        if !marker.is_empty() {
            if !force {
                return Err(OperationError::AlreadyCheckedOut(
                    "The workspace has already been checked out".to_string(),
                ));
            }
            self.workspace.remove_checkout().await?;
        }

        let digest = update_workspace(
            &self.store,
            &self.cache,
            &self.workspace,
            true,
            force,
            progress.as_deref(),
        )
        .await
        .inspect_err(|e| tracing::error!(file = %self.file(), error = %e, "cannot update workspace"))?;

        self.workspace.set_checkout(&digest).await?;
        Ok(())
    }

    /// Publish the workspace back to storage and clear the marker.
    pub async fn commit(
        &self,
        force: bool,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> dcd_core::Result<()> {
        let _guard = self.lock.lock().await;

        let hashes_old = self
            .store
            .get_hashes()
            .await
            .map_err(|e| {
                tracing::error!(file = %self.file(), error = %e, "cannot get hash list from DB");
                OperationError::Internal("Cannot get the hash list from DB".to_string())
            })?;

        if !force {
            let marker = self.workspace.get_checkout().await?;
            if marker.is_empty() {
                return Err(OperationError::NotCheckedOut(
                    "The workspace has not been checked out".to_string(),
                ));
            }
            let current = baseline_digest(&hashes_old)?;
            if current != marker {
                return Err(OperationError::CheckoutMismatch(
                    "Workspace has been changed. Use force to override".to_string(),
                ));
            }
        }

        let hashes_new = commit_workspace(
            &self.store,
            &self.workspace,
            self.cache.chunk_size(),
            progress.as_deref(),
        )
        .await?;

        tracing::debug!(file = %self.file(), chunks = hashes_new.len(), "publishing new hash list");
        let written = hashes_new.len() as i64;
        if let Some(p) = &progress {
            p.set_total(2 * written);
        }
        let mut published: i64 = 0;
        let progress_ref = progress.as_deref();
        let mut on_step = move || {
            published += 1;
            if let Some(p) = progress_ref {
                p.set_progress(written + published);
            }
        };
        self.store
            .set_hashes(&hashes_old, &hashes_new, &mut on_step)
            .await
            .map_err(OperationError::internal)
            .inspect_err(|e| tracing::error!(file = %self.file(), error = %e, "cannot update hash list"))?;

        self.workspace.remove_checkout().await?;
        Ok(())
    }

    /// Reconcile the workspace; with `force`, local edits are overwritten
    /// and the checkout marker cleared.
    pub async fn update(
        &self,
        force: bool,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> dcd_core::Result<()> {
        let _guard = self.lock.lock().await;

        update_workspace(
            &self.store,
            &self.cache,
            &self.workspace,
            true,
            force,
            progress.as_deref(),
        )
        .await
        .inspect_err(|e| tracing::error!(file = %self.file(), error = %e, "cannot update workspace"))?;

        if force {
            self.workspace.remove_checkout().await?;
        }
        Ok(())
    }

    /// Start the periodic reconciliation for this system.
    ///
    /// Each tick acquires the system lock; the next tick is armed after
    /// the current one finishes, whether it succeeded or not.
    pub fn spawn_self_heal(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                {
                    let _guard = self.lock.lock().await;
                    if let Err(e) = update_workspace(
                        &self.store,
                        &self.cache,
                        &self.workspace,
                        false,
                        false,
                        None,
                    )
                    .await
                    {
                        tracing::debug!(file = %self.file(), error = %e, "periodic reconciliation failed");
                    }
                }
                tokio::time::sleep(SELF_HEAL_INTERVAL).await;
            }
        })
    }
}
