//! Router construction and Unix-domain serving.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use std::path::Path;
use tokio::net::UnixListener;
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// All verbs funnel through the fallback: the protocol routes on the
/// repository key and the HTTP method, not on a path tree.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the Unix socket (replacing any stale one) and serve until the
/// process exits.
pub async fn serve(socket: &Path, state: AppState) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket);
    let listener = UnixListener::bind(socket)?;
    tracing::info!(socket = %socket.display(), "listening");
    axum::serve(listener, create_router(state)).await
}
