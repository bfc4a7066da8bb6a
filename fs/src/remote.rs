use async_trait::async_trait;
use berth_cmd::{PowerShell, quote};
use berth_system::Hostname;
use tracing::{debug, instrument};

use crate::{FsError, HostFilesystem};

/// Storage on a remote Windows host, reached with `Invoke-Command`.
#[derive(Debug, Clone)]
pub struct RemoteFs {
    program: String,
}

impl RemoteFs {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn invoke(&self, host: &Hostname, path: &str, block: &str) -> PowerShell {
        let mut ps = PowerShell::new(&self.program);
        ps.line(format!(
            "Invoke-Command -ComputerName {} -ArgumentList {} -ErrorAction Stop -ScriptBlock {{ param($p) {block} }}",
            quote(host.as_ref()),
            quote(path)
        ));
        ps
    }

    fn create_dir_script(&self, host: &Hostname, path: &str) -> PowerShell {
        self.invoke(
            host,
            path,
            "New-Item -ItemType Directory -Force -Path $p -ErrorAction Stop | Out-Null",
        )
    }

    /// A missing directory fails with `ObjectNotFound`; access and session
    /// errors keep their own category.
    fn remove_dir_script(&self, host: &Hostname, path: &str) -> PowerShell {
        self.invoke(
            host,
            path,
            "Remove-Item -LiteralPath $p -Recurse -Force -ErrorAction Stop",
        )
    }
}

#[async_trait]
impl HostFilesystem for RemoteFs {
    #[instrument(skip(self))]
    async fn create_dir(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        debug!("Creating remote directory");
        self.create_dir_script(host, path)
            .run()
            .await
            .map(drop)
            .map_err(|source| FsError::Remote {
                host: host.clone(),
                path: path.to_owned(),
                source,
            })
    }

    #[instrument(skip(self))]
    async fn remove_dir_all(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        debug!("Removing remote directory");
        self.remove_dir_script(host, path)
            .run()
            .await
            .map(drop)
            .map_err(|source| FsError::Remote {
                host: host.clone(),
                path: path.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_targets_host() {
        let fs = RemoteFs::new("pwsh");
        let body = fs
            .create_dir_script(&Hostname::new("hv1"), r"D:\VMs\web01")
            .body();
        assert!(body.starts_with("Invoke-Command -ComputerName 'hv1' -ArgumentList 'D:\\VMs\\web01'"));
        assert!(body.contains("New-Item -ItemType Directory -Force"));
    }

    #[test]
    fn remove_fails_on_any_error() {
        let fs = RemoteFs::new("pwsh");
        let body = fs
            .remove_dir_script(&Hostname::new("hv1"), r"D:\VMs\web01")
            .body();
        assert_eq!(body.lines().count(), 1);
        assert!(!body.contains("Test-Path"));
        assert!(body.contains("-ErrorAction Stop -ScriptBlock"));
        assert!(body.contains("Remove-Item -LiteralPath $p -Recurse -Force -ErrorAction Stop"));
    }
}
