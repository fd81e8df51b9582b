//! Remote block-table access for dcd.
//!
//! The authoritative copy of every repository lives in a single replicated
//! table `files(entryname, block, data, hash)`. Three row roles multiplex
//! over that schema: chunk blobs keyed by content hash, hash-list entries
//! ordered by block, and the indirection pointer row (`block = -1`) naming
//! the currently published list. [`RepoStore`] implements the publication
//! protocol on top of the [`BlockTable`] collaborator interface.

pub mod error;
pub mod repo;
pub mod table;

pub use error::{StoreError, StoreResult};
pub use repo::RepoStore;
pub use table::{BlockRow, BlockTable, SqliteTable};
