//! Daemon bootstrap: storage wiring, self-heal tasks and the RPC socket.

use anyhow::{Context, Result};
use dcd_core::config::{Consistency, DbConfig, RepoSpec};
use dcd_engine::{ChunkCache, System, Workspace};
use dcd_server::AppState;
use dcd_store::{RepoStore, SqliteTable};
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Marker the re-exec'd child carries so it does not fork again.
const REBORN_ENV: &str = "_DCD_REBORN";

/// Whether this process is the detached child of a `-d` invocation.
pub fn is_reborn() -> bool {
    std::env::var_os(REBORN_ENV).is_some()
}

/// Re-exec the current binary detached from the terminal; the parent
/// returns and exits.
pub fn reborn() -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    Command::new(exe)
        .args(args)
        .env(REBORN_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Build every configured system and serve the RPC socket until exit.
pub async fn run(
    db: &str,
    consistency: Consistency,
    repo_cfg: &str,
    socket: &Path,
) -> Result<()> {
    tracing::info!("dcd v{}", env!("CARGO_PKG_VERSION"));

    let db_config = DbConfig::new(db, consistency);
    let table = Arc::new(
        SqliteTable::new(&db_config)
            .await
            .context("cannot open the database")?,
    );

    let specs = RepoSpec::parse_list(repo_cfg).context("invalid repo configuration")?;
    if specs.is_empty() {
        anyhow::bail!("no repositories configured, pass -f file:workspace:cachedir[,...]");
    }

    let mut systems: HashMap<String, Arc<System>> = HashMap::new();
    for spec in specs {
        let store = RepoStore::new(table.clone(), &spec.file);
        store
            .init()
            .await
            .with_context(|| format!("cannot initialise storage for {}", spec.file))?;

        let cache = ChunkCache::new(&spec.cache_dir, dcd_core::CHUNK_SIZE);
        cache
            .init()
            .await
            .with_context(|| format!("cannot initialise cache for {}", spec.file))?;

        let workspace = Workspace::new(&spec.workspace);
        let system = Arc::new(System::new(store, cache, workspace));
        system.clone().spawn_self_heal();

        tracing::info!(
            file = %spec.file,
            workspace = %spec.workspace.display(),
            cache = %spec.cache_dir.display(),
            "repository configured"
        );
        systems.insert(spec.file.clone(), system);
    }

    let state = AppState::new(systems);
    dcd_server::serve(socket, state)
        .await
        .context("rpc server failed")?;
    Ok(())
}
