//! Local chunk cache: one flat directory of files named by hex hash.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tokio::fs;

/// Per-repository chunk cache.
///
/// Contents are a subset of the currently useful chunks; hashes that fall
/// out of the published list are evicted by the reconciler. Reads are not
/// checksum-verified.
#[derive(Clone, Debug)]
pub struct ChunkCache {
    dir: PathBuf,
    chunk_size: usize,
}

impl ChunkCache {
    pub fn new(dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            dir: dir.into(),
            chunk_size,
        }
    }

    /// Chunk size used when re-chunking commits.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Create the cache directory if absent.
    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Path of the file a chunk is cached under.
    pub fn chunk_path(&self, hash: &str) -> PathBuf {
        self.dir.join(hash)
    }

    /// List the hashes currently cached (regular files only).
    pub async fn cached_hashes(&self) -> std::io::Result<Vec<String>> {
        let mut res = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                res.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(res)
    }

    /// Write a chunk to the cache.
    pub async fn write_chunk(&self, hash: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.chunk_path(hash);
        fs::write(&path, data).await?;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o655)).await
    }

    /// Remove a cached chunk.
    pub async fn remove_chunk(&self, hash: &str) -> std::io::Result<()> {
        fs::remove_file(self.chunk_path(hash)).await
    }

    /// Open a cached chunk for reading. Synchronous: chunks are consumed
    /// by the blocking unpack pipeline.
    pub fn open_chunk(&self, hash: &str) -> std::io::Result<std::fs::File> {
        std::fs::File::open(self.chunk_path(hash))
    }
}
