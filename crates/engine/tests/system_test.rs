//! End-to-end tests driving systems on separate hosts against one shared
//! database.

use dcd_core::config::{Consistency, DbConfig};
use dcd_core::{ContentHash, ErrorKind, baseline_digest};
use dcd_engine::workspace::EntryKind;
use dcd_engine::{ChunkCache, System, Workspace};
use dcd_store::{BlockTable, RepoStore, SqliteTable};
use flate2::read::GzDecoder;
use futures::StreamExt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const CHUNK_SIZE: usize = 64;

async fn open_table(dir: &Path) -> Arc<SqliteTable> {
    let config = DbConfig::new(
        dir.join("files.db").display().to_string(),
        Consistency::Quorum,
    );
    let table = Arc::new(SqliteTable::new(&config).await.unwrap());
    table.init().await.unwrap();
    table
}

/// One simulated host: a system with its own workspace and cache.
struct Host {
    system: Arc<System>,
    workspace: Workspace,
    cache: ChunkCache,
}

async fn host(table: Arc<SqliteTable>, file: &str, dir: &Path, name: &str) -> Host {
    let store = RepoStore::new(table, file);
    let cache = ChunkCache::new(dir.join(name).join("cache"), CHUNK_SIZE);
    cache.init().await.unwrap();
    let workspace = Workspace::new(dir.join(name).join("root"));
    let system = Arc::new(System::new(store, cache.clone(), workspace.clone()));
    Host {
        system,
        workspace,
        cache,
    }
}

fn mtime(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

fn seed_tree(workspace: &Workspace, contents: &[u8], stamp: u64) {
    workspace
        .write_entry(
            "a.txt",
            EntryKind::File,
            0o644,
            mtime(stamp),
            &mut Cursor::new(contents.to_vec()),
            true,
        )
        .unwrap();
    workspace
        .write_entry(
            "d",
            EntryKind::Dir,
            0o755,
            mtime(stamp),
            &mut std::io::empty(),
            false,
        )
        .unwrap();
    workspace
        .write_entry(
            "d/b.bin",
            EntryKind::File,
            0o600,
            mtime(stamp),
            &mut Cursor::new(vec![9, 8, 7, 6]),
            true,
        )
        .unwrap();
}

async fn get_bytes(system: &Arc<System>) -> Vec<u8> {
    let mut stream = system.get(None).await.unwrap();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn empty_repository_serves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table, "/repo", dir.path(), "a").await;

    assert!(get_bytes(&a.system).await.is_empty());

    a.workspace.set_checkout("pre-existing").await.unwrap();
    a.system.update(false, None).await.unwrap();
    let names: Vec<String> = std::fs::read_dir(a.workspace.root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![".dcd"]);
}

#[tokio::test]
async fn first_commit_replicates_to_second_host() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    let b = host(table, "/repo", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"hello", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();
    assert_eq!(a.workspace.get_checkout().await.unwrap(), "");

    b.system.update(false, None).await.unwrap();

    assert_eq!(
        std::fs::read(b.workspace.root().join("a.txt")).unwrap(),
        b"hello"
    );
    assert!(b.workspace.root().join("d").is_dir());
    assert_eq!(
        std::fs::read(b.workspace.root().join("d/b.bin")).unwrap(),
        vec![9, 8, 7, 6]
    );

    // Replicated mtimes come from the committed headers, modes are masked.
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(b.workspace.root().join("a.txt")).unwrap();
    assert_eq!(meta.modified().unwrap(), mtime(1_600_000_000));
    assert_eq!(meta.permissions().mode() & 0o222, 0);
    let meta = std::fs::metadata(b.workspace.root().join("d/b.bin")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o400);

    // The served archive is a valid gzipped tar of the committed tree.
    let bytes = get_bytes(&a.system).await;
    let mut names = Vec::new();
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));
    for entry in archive.entries().unwrap() {
        let entry = entry.unwrap();
        names.push(entry.path().unwrap().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["a.txt", "d", "d/b.bin"]);
}

#[tokio::test]
async fn cache_matches_hash_list_after_update() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    let b = host(table.clone(), "/repo", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"first version of the contents", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();
    b.system.update(false, None).await.unwrap();

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"second version, entirely different", 1_600_000_100);
    a.system.commit(false, None).await.unwrap();
    b.system.update(false, None).await.unwrap();

    let store = RepoStore::new(table, "/repo");
    let desired: std::collections::HashSet<String> =
        store.get_hashes().await.unwrap().into_iter().collect();
    let cached: std::collections::HashSet<String> =
        b.cache.cached_hashes().await.unwrap().into_iter().collect();
    assert_eq!(cached, desired);

    // Every published chunk verifies against its hash.
    for h in &desired {
        let data = store.read_chunk(h).await.unwrap();
        assert_eq!(ContentHash::compute(&data).to_hex(), *h);
    }
}

#[tokio::test]
async fn identical_repositories_store_chunks_independently() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/one", dir.path(), "a").await;
    let b = host(table.clone(), "/two", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"shared", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    b.system.edit(false, None).await.unwrap();
    seed_tree(&b.workspace, b"shared", 1_600_000_000);
    b.system.commit(false, None).await.unwrap();

    let one = RepoStore::new(table.clone(), "/one");
    let two = RepoStore::new(table, "/two");
    let hashes_one = one.get_hashes().await.unwrap();
    let hashes_two = two.get_hashes().await.unwrap();
    assert_eq!(hashes_one, hashes_two);

    // Same digests, but each repository owns its own blob rows.
    for h in &hashes_one {
        assert!(one.read_chunk(h).await.is_ok());
        assert!(two.read_chunk(h).await.is_ok());
    }
    two.set_hashes(&hashes_two, &[], &mut || {}).await.unwrap();
    for h in &hashes_one {
        assert!(one.read_chunk(h).await.is_ok());
        assert!(two.read_chunk(h).await.is_err());
    }
}

#[tokio::test]
async fn concurrent_edit_detects_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    let b = host(table, "/repo", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"original", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    // Host A checks out; host B steals the repository underneath it.
    a.system.edit(false, None).await.unwrap();
    let err = a.system.edit(false, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyCheckedOut);

    b.system.edit(true, None).await.unwrap();
    seed_tree(&b.workspace, b"usurped", 1_600_000_200);
    b.system.commit(true, None).await.unwrap();

    let err = a.system.commit(false, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CheckoutMismatch);

    // Host A's marker survives the failed commit; a forced update
    // converges and clears it.
    assert_ne!(a.workspace.get_checkout().await.unwrap(), "");
    a.system.update(true, None).await.unwrap();
    assert_eq!(a.workspace.get_checkout().await.unwrap(), "");
    assert_eq!(
        std::fs::read(a.workspace.root().join("a.txt")).unwrap(),
        b"usurped"
    );
}

#[tokio::test]
async fn commit_without_checkout_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table, "/repo", dir.path(), "a").await;

    let err = a.system.commit(false, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotCheckedOut);

    // force bypasses the state machine entirely
    seed_tree(&a.workspace, b"unsanctioned", 1_600_000_000);
    a.system.commit(true, None).await.unwrap();
}

#[tokio::test]
async fn pointerless_storage_migrates_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;

    // Seed rows the way the pointer-less layout wrote them: an archive
    // chunked under `<repo>:<hash>` and list rows directly under `<repo>`.
    let archive = {
        let gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(gz);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_mtime(1_500_000_000);
        header.set_size(8);
        builder.append_data(&mut header, "old.txt", &b"ancient\n"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    };
    let mut v1_hashes = Vec::new();
    for (i, chunk) in archive.chunks(CHUNK_SIZE).enumerate() {
        let h = ContentHash::compute(chunk).to_hex();
        table
            .upsert_row(&format!("/repo:{h}"), 0, chunk, "")
            .await
            .unwrap();
        table.upsert_row("/repo", i as i64, &[], &h).await.unwrap();
        v1_hashes.push(h);
    }

    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    a.system.update(false, None).await.unwrap();
    assert_eq!(
        std::fs::read(a.workspace.root().join("old.txt")).unwrap(),
        b"ancient\n"
    );

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"migrated", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    // The pointer row is installed and no v1 list rows remain.
    let pointer = table.get_row("/repo", -1).await.unwrap().unwrap();
    assert!(pointer.hash.starts_with("/repo:*"));
    for i in 0..v1_hashes.len() as i64 {
        assert!(table.get_row("/repo", i).await.unwrap().is_none());
    }

    let b = host(table, "/repo", dir.path(), "b").await;
    b.system.update(false, None).await.unwrap();
    assert_eq!(
        std::fs::read(b.workspace.root().join("a.txt")).unwrap(),
        b"migrated"
    );
}

#[tokio::test]
async fn self_heal_converges_a_clean_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    let b = host(table, "/repo", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"healed", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    let heal = b.system.clone().spawn_self_heal();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if b.workspace.root().join("a.txt").exists() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("self-heal did not converge in time");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    heal.abort();
    assert_eq!(
        std::fs::read(b.workspace.root().join("a.txt")).unwrap(),
        b"healed"
    );
}

#[tokio::test]
async fn edited_workspace_is_not_touched_until_forced() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;
    let b = host(table, "/repo", dir.path(), "b").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"v1", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    b.system.edit(false, None).await.unwrap();

    seed_tree(&a.workspace, b"v2", 1_600_000_300);
    a.system.commit(true, None).await.unwrap();

    // A plain update keeps the checked-out tree as it is.
    b.system.update(false, None).await.unwrap();
    assert_eq!(
        std::fs::read(b.workspace.root().join("a.txt")).unwrap(),
        b"v1"
    );

    // Forcing replaces local state and clears the marker.
    b.system.update(true, None).await.unwrap();
    assert_eq!(
        std::fs::read(b.workspace.root().join("a.txt")).unwrap(),
        b"v2"
    );
    assert_eq!(b.workspace.get_checkout().await.unwrap(), "");
}

#[tokio::test]
async fn forced_commit_twice_publishes_identical_lists() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;

    a.system.edit(false, None).await.unwrap();
    seed_tree(&a.workspace, b"stable", 1_600_000_000);
    a.system.commit(false, None).await.unwrap();

    let store = RepoStore::new(table, "/repo");
    let first = store.get_hashes().await.unwrap();
    a.system.commit(true, None).await.unwrap();
    let second = store.get_hashes().await.unwrap();
    assert_eq!(first, second);

    // The checkout marker matches the baseline digest after an edit.
    a.system.edit(false, None).await.unwrap();
    assert_eq!(
        a.workspace.get_checkout().await.unwrap(),
        baseline_digest(&second).unwrap()
    );
}

#[tokio::test]
async fn unknown_chunk_read_fails_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    let table = open_table(dir.path()).await;
    let a = host(table.clone(), "/repo", dir.path(), "a").await;

    // A list entry whose blob is missing.
    table.upsert_row("/repo", 0, &[], "deadbeef").await.unwrap();

    let mut stream = a.system.get(None).await.unwrap();
    let first = stream.next().await.unwrap();
    let err = first.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("deadbeef"));
}
