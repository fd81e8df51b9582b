//! Streams cached chunks through gzip and tar into the workspace.

use crate::cache::ChunkCache;
use crate::workspace::{EntryKind, Workspace};
use dcd_core::OperationError;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::io::{self, Read};
use std::time::{Duration, SystemTime};
use tar::EntryType;

/// Sequential concatenation of chunk readers into one logical stream.
struct MultiReader<R> {
    rest: std::vec::IntoIter<R>,
    current: Option<R>,
}

impl<R: Read> MultiReader<R> {
    fn new(readers: Vec<R>) -> Self {
        let mut rest = readers.into_iter();
        let current = rest.next();
        Self { rest, current }
    }
}

impl<R: Read> Read for MultiReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(reader) = self.current.as_mut() {
            let n = reader.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.current = self.rest.next();
        }
        Ok(0)
    }
}

/// Unpack the archive described by `hashes` into the workspace, then prune
/// entries that disappeared upstream.
///
/// A checked-out workspace is left untouched unless `replace` is set. Runs
/// synchronously; callers dispatch it on a blocking task.
pub fn unpack(
    cache: &ChunkCache,
    workspace: &Workspace,
    hashes: &[String],
    replace: bool,
) -> dcd_core::Result<()> {
    let marker = workspace.checkout_sync()?;
    if !marker.is_empty() && !replace {
        tracing::debug!("skipping unpack, the workspace has been checked out");
        return Ok(());
    }

    let mut existing_entries: HashSet<String> = HashSet::new();

    if !hashes.is_empty() {
        tracing::debug!(chunks = hashes.len(), "unpacking");
        let mut readers = Vec::with_capacity(hashes.len());
        for hash in hashes {
            readers.push(cache.open_chunk(hash)?);
        }

        let joined = MultiReader::new(readers);
        let mut archive = tar::Archive::new(GzDecoder::new(joined));

        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header();

            let kind = match header.entry_type() {
                EntryType::Directory => EntryKind::Dir,
                t if t.is_file() => EntryKind::File,
                t => {
                    return Err(OperationError::Internal(format!(
                        "unsupported tar entry type: {t:?}"
                    )));
                }
            };

            let name = entry
                .path()?
                .to_string_lossy()
                .trim_end_matches('/')
                .to_string();
            let mode = header.mode()? & 0o777555;
            let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(header.mtime()?);

            existing_entries.insert(name.clone());
            workspace.write_entry(&name, kind, mode, mtime, &mut entry, replace)?;
        }
    }

    workspace.remove_all(|path| !existing_entries.contains(path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn archive_with(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_mtime(1_600_000_000);
            match data {
                Some(bytes) => {
                    header.set_entry_type(EntryType::Regular);
                    header.set_mode(0o644);
                    header.set_size(bytes.len() as u64);
                    builder.append_data(&mut header, name, *bytes).unwrap();
                }
                None => {
                    header.set_entry_type(EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    builder.append_data(&mut header, name, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    async fn seed_cache(dir: &std::path::Path, archive: &[u8], chunk_size: usize) -> (ChunkCache, Vec<String>) {
        let cache = ChunkCache::new(dir.join("cache"), chunk_size);
        cache.init().await.unwrap();
        let mut hashes = Vec::new();
        for chunk in archive.chunks(chunk_size) {
            let h = dcd_core::ContentHash::compute(chunk).to_hex();
            cache.write_chunk(&h, chunk).await.unwrap();
            hashes.push(h);
        }
        (cache, hashes)
    }

    #[tokio::test]
    async fn unpacks_files_and_dirs_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("root"));

        // Pre-existing local entry that is absent upstream.
        workspace
            .write_entry(
                "stale.txt",
                EntryKind::File,
                0o644,
                SystemTime::now(),
                &mut io::Cursor::new(b"stale".to_vec()),
                false,
            )
            .unwrap();

        let archive = archive_with(&[
            ("a.txt", Some(b"hello")),
            ("d", None),
            ("d/b.bin", Some(&[1, 2, 3, 4])),
        ]);
        let (cache, hashes) = seed_cache(dir.path(), &archive, 64).await;

        tokio::task::spawn_blocking({
            let cache = cache.clone();
            let workspace = workspace.clone();
            move || unpack(&cache, &workspace, &hashes, false)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(
            std::fs::read(workspace.root().join("a.txt")).unwrap(),
            b"hello"
        );
        assert!(workspace.root().join("d").is_dir());
        assert_eq!(
            std::fs::read(workspace.root().join("d/b.bin")).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert!(!workspace.root().join("stale.txt").exists());
    }

    #[tokio::test]
    async fn checked_out_workspace_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("root"));
        workspace.set_checkout("digest").await.unwrap();

        let archive = archive_with(&[("a.txt", Some(b"hello"))]);
        let (cache, hashes) = seed_cache(dir.path(), &archive, 64).await;

        unpack(&cache, &workspace, &hashes, false).unwrap();
        assert!(!workspace.root().join("a.txt").exists());

        // replace overrides the skip
        unpack(&cache, &workspace, &hashes, true).unwrap();
        assert!(workspace.root().join("a.txt").exists());
    }

    #[tokio::test]
    async fn empty_hash_list_only_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("root"));
        workspace
            .write_entry(
                "gone.txt",
                EntryKind::File,
                0o644,
                SystemTime::now(),
                &mut io::Cursor::new(b"x".to_vec()),
                false,
            )
            .unwrap();

        let cache = ChunkCache::new(dir.path().join("cache"), 64);
        cache.init().await.unwrap();

        unpack(&cache, &workspace, &[], false).unwrap();
        assert!(!workspace.root().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn symlink_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("root"));

        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_mtime(1_600_000_000);
        header.set_size(0);
        builder
            .append_link(&mut header, "link", "target")
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let (cache, hashes) = seed_cache(dir.path(), &archive, 64).await;
        let err = unpack(&cache, &workspace, &hashes, false).unwrap_err();
        assert!(err.to_string().contains("unsupported tar entry type"));
    }
}
