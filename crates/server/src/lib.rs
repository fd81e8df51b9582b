//! Unix-domain HTTP RPC surface for dcd.
//!
//! The URL path is the repository key; the verbs are the operations:
//! standard `GET` streams the archive, and the non-standard `EDIT`,
//! `COMMIT`, `UPDATE` and `PROGRESS` verbs drive the checkout state
//! machine and the progress side-channel.

pub mod error;
pub mod handlers;
pub mod progress;
pub mod routes;
pub mod state;

pub use error::{ErrorMessage, RpcError};
pub use progress::ProgressRegistry;
pub use routes::{create_router, serve};
pub use state::AppState;
