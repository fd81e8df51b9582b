//! Configuration types shared across crates.
//!
//! All configuration arrives through command-line flags; there is no file
//! or environment layer.

use crate::error::OperationError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Read/write consistency level requested from the replicated database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Consistency {
    #[default]
    Quorum,
    One,
    All,
}

impl Consistency {
    /// Name as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quorum => "quorum",
            Self::One => "one",
            Self::All => "all",
        }
    }
}

impl FromStr for Consistency {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quorum" => Ok(Self::Quorum),
            "one" => Ok(Self::One),
            "all" => Ok(Self::All),
            other => Err(OperationError::InvalidRequest(format!(
                "unsupported consistency level: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database connection settings.
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Endpoint of the replicated database.
    pub endpoint: String,
    /// Requested consistency level for reads and writes.
    pub consistency: Consistency,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl DbConfig {
    pub fn new(endpoint: impl Into<String>, consistency: Consistency) -> Self {
        Self {
            endpoint: endpoint.into(),
            consistency,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// One managed repository: the logical key plus the local directories the
/// daemon materialises it into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoSpec {
    /// Logical key of the repository (a file-like path).
    pub file: String,
    /// Workspace root directory.
    pub workspace: PathBuf,
    /// Local chunk cache directory.
    pub cache_dir: PathBuf,
}

impl RepoSpec {
    /// Parse a single `file:workspace:cachedir` triple.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(file), Some(workspace), Some(cache_dir))
                if !file.is_empty() && !workspace.is_empty() && !cache_dir.is_empty() =>
            {
                Ok(Self {
                    file: file.to_string(),
                    workspace: PathBuf::from(workspace),
                    cache_dir: PathBuf::from(cache_dir),
                })
            }
            _ => Err(OperationError::InvalidRequest(format!(
                "invalid repo configuration: {s}"
            ))),
        }
    }

    /// Parse a comma-separated list of triples.
    pub fn parse_list(s: &str) -> crate::Result<Vec<Self>> {
        s.split(',')
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }
}
