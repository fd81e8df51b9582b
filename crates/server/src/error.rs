//! RPC error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dcd_core::{ErrorKind, OperationError};
use serde::{Deserialize, Serialize};

/// JSON error body: `{"message": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Response wrapper mapping operation errors onto HTTP statuses.
///
/// State-machine violations and bad requests are client errors; everything
/// else, including an unknown repository key, stays a 500.
#[derive(Debug)]
pub struct RpcError(pub OperationError);

impl From<OperationError> for RpcError {
    fn from(err: OperationError) -> Self {
        Self(err)
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::NotCheckedOut
            | ErrorKind::AlreadyCheckedOut
            | ErrorKind::CheckoutMismatch
            | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorMessage {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for RPC handlers.
pub type RpcResult<T> = std::result::Result<T, RpcError>;
