use async_trait::async_trait;
use berth_system::Hostname;
use tokio::fs;
use tracing::debug;

use crate::{FsError, HostFilesystem};

/// Storage on the machine this process runs on, for when the controller is the host.
#[derive(Debug, Clone, Default)]
pub struct LocalFs;

#[async_trait]
impl HostFilesystem for LocalFs {
    async fn create_dir(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        debug!(%host, path, "Creating local directory");
        fs::create_dir_all(path)
            .await
            .map_err(|source| FsError::CreateDir {
                path: path.to_owned(),
                source,
            })
    }

    async fn remove_dir_all(&self, host: &Hostname, path: &str) -> Result<(), FsError> {
        debug!(%host, path, "Removing local directory");
        fs::remove_dir_all(path)
            .await
            .map_err(|source| FsError::RemoveDir {
                path: path.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("berth-fs-{}-{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test]
    async fn create_then_remove() {
        let host = Hostname::new("localhost");
        let dir = scratch("roundtrip");
        let nested = crate::join(&dir, "web01");

        LocalFs.create_dir(&host, &nested).await.unwrap();
        LocalFs.create_dir(&host, &nested).await.unwrap();
        assert!(fs::try_exists(&nested).await.unwrap());

        LocalFs.remove_dir_all(&host, &dir).await.unwrap();
        assert!(!fs::try_exists(&dir).await.unwrap());
    }

    #[tokio::test]
    async fn removing_missing_dir_is_not_found() {
        let host = Hostname::new("localhost");
        let err = LocalFs
            .remove_dir_all(&host, &scratch("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
