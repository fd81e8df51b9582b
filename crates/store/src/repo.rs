//! Per-repository view of the block table: hash list and chunk blobs.

use crate::error::{StoreError, StoreResult};
use crate::table::BlockTable;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Rows fetched per page when scanning a hash list.
const PAGE_SIZE: i64 = 256;

/// Storage access for a single repository.
///
/// Hash-list rows are reached through the indirection pointer at
/// `(file, -1)`: its `hash` column names the alias key the current list
/// lives under. Repositories written before the pointer scheme keep their
/// list directly under `file` and are read via the v1 fallback.
#[derive(Clone)]
pub struct RepoStore {
    table: Arc<dyn BlockTable>,
    file: String,
}

impl RepoStore {
    pub fn new(table: Arc<dyn BlockTable>, file: impl Into<String>) -> Self {
        Self {
            table,
            file: file.into(),
        }
    }

    /// Logical key of the repository.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Create the backing schema if absent.
    pub async fn init(&self) -> StoreResult<()> {
        self.table.init().await
    }

    fn chunk_key(&self, hash: &str) -> String {
        format!("{}:{}", self.file, hash)
    }

    /// Assemble the hash list stored under `entry`, page by page.
    ///
    /// Slots are keyed by block number; sparse blocks pad with empty
    /// strings. Pointer rows (`block < 0`) never match the scan.
    async fn scan_list(&self, entry: &str) -> StoreResult<Vec<String>> {
        let mut res: Vec<String> = Vec::new();
        let mut after = -1i64;
        loop {
            let rows = self.table.scan_blocks(entry, after, PAGE_SIZE).await?;
            let page_len = rows.len() as i64;
            for row in rows {
                after = row.block;
                let index = row.block as usize;
                while res.len() <= index {
                    res.push(String::new());
                }
                res[index] = row.hash;
            }
            if page_len < PAGE_SIZE {
                break;
            }
        }
        Ok(res)
    }

    /// Return the currently published hash list, in chunk order.
    pub async fn get_hashes(&self) -> StoreResult<Vec<String>> {
        if let Some(pointer) = self.table.get_row(&self.file, -1).await? {
            if !pointer.hash.is_empty() {
                return self.scan_list(&pointer.hash).await;
            }
        }
        self.scan_list(&self.file).await
    }

    /// Best-effort removal of a half-published list.
    async fn rollback_ref(&self, new_ref: &str) {
        if let Err(e) = self.table.delete_entry(new_ref).await {
            tracing::warn!(
                file = %self.file,
                list = %new_ref,
                error = %e,
                "cannot roll back half-published hash list"
            );
        }
    }

    /// Atomically publish `new_hashes`, replacing `old_hashes`.
    ///
    /// The list rows are written under a freshly minted alias key first;
    /// the single pointer upsert is the commit point, so a concurrent
    /// reader sees either the complete old list or the complete new one.
    /// `on_step` fires once per published hash. Pruning of the superseded
    /// list and of chunk blobs that fell out of it is best-effort: failures
    /// are logged, never surfaced.
    pub async fn set_hashes(
        &self,
        old_hashes: &[String],
        new_hashes: &[String],
        on_step: &mut (dyn FnMut() + Send),
    ) -> StoreResult<()> {
        let pointer = self.table.get_row(&self.file, -1).await?;
        let old_version = pointer.is_none();
        let prev_ref = pointer.map(|p| p.hash).filter(|h| !h.is_empty());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .as_secs();
        let new_ref = format!("{}:*{}", self.file, now);

        // Two publishes within the same second mint the same alias key;
        // clear any stale rows so a shorter list cannot inherit a tail.
        if prev_ref.as_deref() == Some(new_ref.as_str()) {
            self.rollback_ref(&new_ref).await;
        }

        for (i, hash) in new_hashes.iter().enumerate() {
            if let Err(e) = self.table.upsert_row(&new_ref, i as i64, &[], hash).await {
                self.rollback_ref(&new_ref).await;
                return Err(e);
            }
        }

        if let Err(e) = self.table.upsert_row(&self.file, -1, &[], &new_ref).await {
            self.rollback_ref(&new_ref).await;
            return Err(e);
        }

        for _ in new_hashes {
            on_step();
        }

        if old_version {
            // Migration from the pointer-less layout: the old list rows sit
            // directly under the repository key and must all go.
            for block in 0..old_hashes.len() as i64 {
                if let Err(e) = self.table.delete_block(&self.file, block).await {
                    tracing::warn!(
                        file = %self.file,
                        block,
                        error = %e,
                        "cannot prune old hash-list row"
                    );
                }
            }
        } else if let Some(prev) = prev_ref {
            if prev != new_ref {
                if let Err(e) = self.table.delete_entry(&prev).await {
                    tracing::warn!(
                        file = %self.file,
                        list = %prev,
                        error = %e,
                        "cannot prune superseded hash list"
                    );
                }
            }
        }

        let keep: HashSet<&str> = new_hashes.iter().map(String::as_str).collect();
        for hash in old_hashes {
            if !keep.contains(hash.as_str()) {
                if let Err(e) = self.table.delete_entry(&self.chunk_key(hash)).await {
                    tracing::warn!(
                        file = %self.file,
                        chunk = %hash,
                        error = %e,
                        "cannot delete unreferenced chunk"
                    );
                }
            }
        }

        Ok(())
    }

    /// Fetch one chunk blob by content hash.
    pub async fn read_chunk(&self, hash: &str) -> StoreResult<Vec<u8>> {
        tracing::debug!(file = %self.file, chunk = %hash, "read chunk");
        match self.table.get_row(&self.chunk_key(hash), 0).await? {
            Some(row) => Ok(row.data),
            None => Err(StoreError::ChunkNotFound {
                file: self.file.clone(),
                hash: hash.to_string(),
            }),
        }
    }

    /// Store one chunk blob under its content hash.
    pub async fn write_chunk(&self, hash: &str, data: &[u8]) -> StoreResult<()> {
        tracing::debug!(file = %self.file, chunk = %hash, len = data.len(), "write chunk");
        self.table.upsert_row(&self.chunk_key(hash), 0, data, "").await
    }
}
