//! Request dispatch for the verb-based RPC protocol.

use crate::error::RpcError;
use crate::progress::ProgressGuard;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use dcd_core::OperationError;
use dcd_core::progress::ProgressSink;
use dcd_engine::ByteStream;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Archive stream that keeps its progress registration alive until the
/// response body is fully written or dropped.
struct GuardedStream {
    inner: ByteStream,
    _guard: Option<ProgressGuard>,
}

impl Stream for GuardedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner
            .as_mut()
            .poll_next(cx)
            .map(|item| item.map(|res| res.map_err(std::io::Error::other)))
    }
}

fn query_map(req: &Request) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(map)| map)
        .unwrap_or_default()
}

/// Every request lands here; there is no path routing beyond the systems
/// map itself.
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = query_map(&req);

    let force = query.get("force").map(String::as_str) == Some("true");
    let progress_id = query.get("progress").cloned();

    tracing::debug!(method = %method, path = %path, force, "rpc request");

    let Some(system) = state.system(&path) else {
        return RpcError(OperationError::UnknownFile(format!("Unknown file: {path}")))
            .into_response();
    };

    // Mutating verbs (and GET) may carry a progress id; PROGRESS itself
    // only reads one.
    let guard = if method != "PROGRESS" {
        match progress_id.as_deref() {
            Some(id) => match state.progress.register(id) {
                Ok(guard) => Some(guard),
                Err(e) => return RpcError(e).into_response(),
            },
            None => None,
        }
    } else {
        None
    };
    let sink = guard
        .as_ref()
        .map(|g| g.handler() as Arc<dyn ProgressSink>);

    match method.as_str() {
        "GET" => match system.get(sink).await {
            Ok(stream) => Body::from_stream(GuardedStream {
                inner: stream,
                _guard: guard,
            })
            .into_response(),
            Err(e) => RpcError(e).into_response(),
        },
        "EDIT" => finish(system.edit(force, sink).await, guard),
        "COMMIT" => finish(system.commit(force, sink).await, guard),
        "UPDATE" => finish(system.update(force, sink).await, guard),
        "PROGRESS" => progress_snapshot(&state, progress_id.as_deref()),
        other => RpcError(OperationError::InvalidRequest(format!(
            "Unsupported method: {other}"
        )))
        .into_response(),
    }
}

/// Mutating verbs answer a bare 200, or the final progress snapshot when a
/// handler was registered.
fn finish(result: dcd_core::Result<()>, guard: Option<ProgressGuard>) -> Response {
    match result {
        Ok(()) => match guard {
            Some(guard) => Json(guard.handler().snapshot()).into_response(),
            None => StatusCode::OK.into_response(),
        },
        Err(e) => RpcError(e).into_response(),
    }
}

fn progress_snapshot(state: &AppState, id: Option<&str>) -> Response {
    let Some(id) = id else {
        return RpcError(OperationError::InvalidRequest(
            "Missing request parameter `progress`".to_string(),
        ))
        .into_response();
    };
    match state.progress.lookup(id) {
        Some(handler) => Json(handler.snapshot()).into_response(),
        None => RpcError(OperationError::InvalidRequest(format!(
            "Could not find progress handler: `{id}`"
        )))
        .into_response(),
    }
}
