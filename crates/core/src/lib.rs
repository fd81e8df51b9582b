//! Core domain types and shared logic for the dcd configuration daemon.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and the hex framing of chunk digests
//! - Operation errors with wire-stable kind tags
//! - Repository and database configuration
//! - Progress reporting primitives

pub mod config;
pub mod error;
pub mod hash;
pub mod progress;

pub use error::{ErrorKind, OperationError, Result};
pub use hash::{ContentHash, ContentHasher, baseline_digest, parse_hex_lenient};
pub use progress::{ProgressHandler, ProgressReport, ProgressSink};

/// Default chunk size: 64 KiB.
///
/// A repository archive is sliced into chunks of exactly this many bytes;
/// only the final chunk may be shorter.
pub const CHUNK_SIZE: usize = 65_536;
