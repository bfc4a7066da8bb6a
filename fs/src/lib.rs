//! Host-side storage directories for machines.

mod local;
mod remote;

pub use crate::local::LocalFs;
pub use crate::remote::RemoteFs;

use async_trait::async_trait;
use berth_cmd::PowerShellError;
use berth_system::Hostname;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Cannot create directory '{path}': {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Cannot remove directory '{path}': {source}")]
    RemoveDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Directory '{path}' on {host} failed: {source}")]
    Remote {
        host: Hostname,
        path: String,
        #[source]
        source: PowerShellError,
    },
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::CreateDir { .. } => false,
            FsError::RemoveDir { source, .. } => source.kind() == io::ErrorKind::NotFound,
            FsError::Remote { source, .. } => source.is_not_found(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            FsError::Remote { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}

/// Directory management on a virtualization host.
#[async_trait]
pub trait HostFilesystem: Send + Sync {
    /// Create `path` and any missing parents. Existing directories are fine.
    async fn create_dir(&self, host: &Hostname, path: &str) -> Result<(), FsError>;

    /// Recursively remove `path`. A missing directory is a not-found error.
    async fn remove_dir_all(&self, host: &Hostname, path: &str) -> Result<(), FsError>;
}

/// Join a host path and a child name using the separator `base` already uses.
pub fn join(base: &str, child: &str) -> String {
    let separator = if base.contains('\\') { '\\' } else { '/' };
    let base = base.trim_end_matches(['\\', '/']);
    format!("{base}{separator}{child}")
}
