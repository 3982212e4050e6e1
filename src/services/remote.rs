use crate::errors::LaunchError;
use crate::services::credentials::Credentials;
use crate::services::handle::SpawnedProcess;
use async_trait::async_trait;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Opens authenticated sessions against a remote host.
#[async_trait]
pub trait RemoteExecutionService: Send + Sync {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, LaunchError>;
}

/// Paths are remote absolute paths unless stated otherwise.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn home_dir(&self) -> Result<String, LaunchError>;

    /// Creates `path` and any missing parents.
    async fn mkdir(&self, path: &str) -> Result<(), LaunchError>;

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), LaunchError>;

    /// Runs `command` with `dir` as its working directory.
    async fn start(&self, dir: &str, command: &str) -> Result<SpawnedProcess, LaunchError>;

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, LaunchError>;

    /// Copies `remote` to `local` and returns the byte count.
    async fn download(&self, remote: &str, local: &Path) -> Result<u64, LaunchError>;

    async fn close(&self) -> Result<(), LaunchError>;
}
