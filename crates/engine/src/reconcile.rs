//! The reconciler: drives the local workspace toward the published state.

use crate::cache::ChunkCache;
use crate::unpack::unpack;
use crate::workspace::Workspace;
use dcd_core::progress::ProgressSink;
use dcd_core::{OperationError, baseline_digest};
use dcd_store::RepoStore;
use std::collections::HashSet;

/// Reconcile storage, cache and workspace; returns the baseline digest of
/// the hash list that was reconciled against.
///
/// Missing chunks are downloaded in list order, the archive is unpacked
/// when anything changed (or `force_unpack`), and chunks that fell out of
/// the list are evicted from the cache. Eviction failures are logged and
/// swallowed. The declared progress total is
/// `|to_download| + (|desired| if unpacking) + |to_remove|`.
pub async fn update_workspace(
    store: &RepoStore,
    cache: &ChunkCache,
    workspace: &Workspace,
    force_unpack: bool,
    replace: bool,
    progress: Option<&dyn ProgressSink>,
) -> dcd_core::Result<String> {
    let desired = store.get_hashes().await.map_err(OperationError::internal)?;
    let cached = cache.cached_hashes().await?;

    let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let cached_set: HashSet<&str> = cached.iter().map(String::as_str).collect();

    let to_download: Vec<&String> = desired
        .iter()
        .filter(|h| !cached_set.contains(h.as_str()))
        .collect();
    let needs_unpack = force_unpack || !to_download.is_empty() || desired.len() != cached.len();
    let to_remove: Vec<&String> = cached
        .iter()
        .filter(|h| !desired_set.contains(h.as_str()))
        .collect();

    let total = to_download.len()
        + if needs_unpack { desired.len() } else { 0 }
        + to_remove.len();
    if let Some(p) = progress {
        p.set_total(total as i64);
        p.set_progress(0);
    }
    let mut done: i64 = 0;

    for hash in &to_download {
        tracing::debug!(chunk = %hash, "downloading chunk");
        let data = store
            .read_chunk(hash)
            .await
            .map_err(OperationError::internal)?;
        cache.write_chunk(hash, &data).await?;
        done += 1;
        if let Some(p) = progress {
            p.set_progress(done);
        }
    }

    if needs_unpack {
        let cache = cache.clone();
        let workspace = workspace.clone();
        let hashes = desired.clone();
        tokio::task::spawn_blocking(move || unpack(&cache, &workspace, &hashes, replace))
            .await
            .map_err(OperationError::internal)??;
        done += desired.len() as i64;
        if let Some(p) = progress {
            p.set_progress(done);
        }
    }

    for hash in &to_remove {
        if let Err(e) = cache.remove_chunk(hash).await {
            tracing::warn!(chunk = %hash, error = %e, "cannot evict cached chunk");
        }
        done += 1;
        if let Some(p) = progress {
            p.set_progress(done);
        }
    }

    baseline_digest(&desired)
}
