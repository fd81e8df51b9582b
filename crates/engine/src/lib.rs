//! Synchronisation and publication engine for dcd.
//!
//! Each managed repository is the triple (store, cache, workspace) wrapped
//! in a [`System`] that serialises operations on a per-repository mutex:
//! - the [`cache`] holds downloaded chunks as flat files,
//! - the [`workspace`] is the materialised directory tree plus the
//!   checkout marker,
//! - the [`reconcile`]r drives the workspace toward the published state,
//! - the [`commit`] pipeline re-chunks the workspace back into storage,
//! - the [`unpack`]er streams cached chunks through gzip/tar into the
//!   workspace.

pub mod cache;
pub mod commit;
pub mod reconcile;
pub mod system;
pub mod unpack;
pub mod workspace;

pub use cache::ChunkCache;
pub use commit::commit_workspace;
pub use reconcile::update_workspace;
pub use system::{ByteStream, System};
pub use workspace::{CHECKOUT_MARKER, EntryKind, Workspace};
