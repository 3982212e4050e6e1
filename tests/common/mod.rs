#![allow(dead_code)]

use async_trait::async_trait;
use hpc_launch::errors::LaunchError;
use hpc_launch::services::credentials::Credentials;
use hpc_launch::services::handle::{ExecutionHandle, SpawnedProcess};
use hpc_launch::services::remote::{RemoteEntry, RemoteExecutionService, RemoteSession, RemoteTarget};
use hpc_launch::Parameters;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn tmp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create tmp dir");
    dir
}

/// Minimal job dictionary rooted at `root`: no input upload, output files in
/// `root/out`.
pub fn job_params(root: &Path, host: &str, executable: &str) -> Parameters {
    Parameters::new()
        .with("executable", executable)
        .with("hostname", host)
        .with("projectSpaceDir", root.display().to_string())
        .with("stdOutFileName", root.join("out/stdout.txt").display().to_string())
        .with("stdErrFileName", root.join("out/stderr.txt").display().to_string())
        .with("uploadInput", "false")
        .with("localJobLaunchDirectory", "run1")
}

pub fn read(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// Text after the first run header, i.e. what the stages printed.
pub fn stage_output(text: &str) -> String {
    match text.find("\n\n") {
        Some(idx) => text[idx + 2..].to_string(),
        None => String::new(),
    }
}

pub fn find_results_dir(root: &Path) -> Option<PathBuf> {
    std::fs::read_dir(root.join("jobs"))
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("remoteIceLaunch_"))
                .unwrap_or(false)
        })
}

/// Remote service double: "remote" paths are real paths below a scratch
/// directory and commands run through the local `sh`.
#[derive(Clone)]
pub struct FakeRemote {
    pub root: PathBuf,
    pub calls: Arc<StdMutex<Vec<String>>>,
    pub reject_password: Option<String>,
}

impl FakeRemote {
    pub fn new(root: &Path) -> Self {
        let root = root.join("remote");
        std::fs::create_dir_all(root.join("home")).expect("create fake home");
        Self {
            root,
            calls: Arc::new(StdMutex::new(Vec::new())),
            reject_password: None,
        }
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn called(&self, op: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(op))
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl RemoteExecutionService for FakeRemote {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, LaunchError> {
        self.record(format!("connect {}@{}:{}", credentials.username(), target.host, target.port));
        if self.reject_password.as_deref() == Some(credentials.password()) {
            return Err(LaunchError::connection("Authentication failed"));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RemoteSession for FakeRemote {
    async fn home_dir(&self) -> Result<String, LaunchError> {
        Ok(self.home().display().to_string())
    }

    async fn mkdir(&self, path: &str) -> Result<(), LaunchError> {
        self.record(format!("mkdir {}", path));
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), LaunchError> {
        self.record(format!("upload {}", remote));
        tokio::fs::copy(local, remote)
            .await
            .map_err(|err| LaunchError::transfer(err.to_string()))?;
        Ok(())
    }

    async fn start(&self, dir: &str, command: &str) -> Result<SpawnedProcess, LaunchError> {
        self.record(format!("start {}", command));
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| LaunchError::stage_execution(err.to_string()))?;
        let stdout = child.stdout.take().expect("stdout pipe");
        let stderr = child.stderr.take().expect("stderr pipe");
        let (handle, reporter) = ExecutionHandle::channel(command);
        let kill = reporter.kill_signal();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                _ = kill.cancelled() => {
                    let _ = child.kill().await;
                    -1
                }
            };
            reporter.report(code);
        });
        Ok(SpawnedProcess {
            handle,
            stdout: Box::pin(stdout),
            stderr: Box::pin(stderr),
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, LaunchError> {
        self.record(format!("list {}", dir));
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: entry.path().display().to_string(),
                size: meta.len(),
                is_dir: meta.is_dir(),
            });
        }
        Ok(out)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, LaunchError> {
        self.record(format!("download {}", remote));
        tokio::fs::copy(remote, local)
            .await
            .map_err(|err| LaunchError::transfer(err.to_string()))
    }

    async fn close(&self) -> Result<(), LaunchError> {
        self.record("close".to_string());
        Ok(())
    }
}
