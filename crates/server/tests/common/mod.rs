//! Common test fixtures for the RPC surface.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use dcd_core::config::{Consistency, DbConfig};
use dcd_engine::{ChunkCache, System, Workspace};
use dcd_server::{AppState, create_router};
use dcd_store::{RepoStore, SqliteTable};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const REPO: &str = "/file.tgz";

/// An in-process server over a single temp-backed repository.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub workspace: Workspace,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let config = DbConfig::new(
            temp_dir.path().join("files.db").display().to_string(),
            Consistency::Quorum,
        );
        let table = Arc::new(SqliteTable::new(&config).await.expect("open table"));
        let store = RepoStore::new(table, REPO);
        store.init().await.expect("init table");

        let cache = ChunkCache::new(temp_dir.path().join("cache"), 64);
        cache.init().await.expect("init cache");
        let workspace = Workspace::new(temp_dir.path().join("root"));

        let system = Arc::new(System::new(store, cache, workspace.clone()));
        let mut systems = HashMap::new();
        systems.insert(REPO.to_string(), system);

        let state = AppState::new(systems);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            workspace,
            _temp_dir: temp_dir,
        }
    }

    /// Issue one request with an arbitrary verb and collect the body.
    pub async fn request(&self, method: &str, uri: &str) -> (StatusCode, Bytes) {
        let req = Request::builder()
            .method(Method::from_bytes(method.as_bytes()).unwrap())
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    /// Drop a file into the workspace the way an editing client would.
    pub fn put_file(&self, name: &str, contents: &[u8]) {
        use dcd_engine::workspace::EntryKind;
        self.workspace
            .write_entry(
                name,
                EntryKind::File,
                0o644,
                std::time::SystemTime::now(),
                &mut std::io::Cursor::new(contents.to_vec()),
                true,
            )
            .expect("write workspace file");
    }
}
