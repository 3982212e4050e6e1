use crate::constants::layout;
use crate::errors::LaunchError;
use crate::services::job_spec::{join_remote, JobSpec};
use crate::services::logger::Logger;
use crate::services::output::OutputLog;
use crate::services::remote::RemoteSession;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub results_dir: PathBuf,
    pub downloaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Pulls output artifacts back from the remote working directory.
pub struct ResultCollector<'a> {
    spec: &'a JobSpec,
    output: &'a OutputLog,
    logger: Logger,
}

impl<'a> ResultCollector<'a> {
    pub fn new(spec: &'a JobSpec, output: &'a OutputLog, logger: &Logger) -> Self {
        Self {
            spec,
            output,
            logger: logger.child("collect"),
        }
    }

    /// Directory listed for results: `downloadDirectory` when set, otherwise the
    /// remote working directory.
    pub fn source_dir(&self, home: &str, remote_working_dir: &str) -> String {
        match self.spec.download_directory.as_deref() {
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => join_remote(home, dir),
            None => remote_working_dir.to_string(),
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.spec.project_root().join(layout::JOBS_DIR).join(format!(
            "{}{}",
            layout::REMOTE_RESULTS_PREFIX,
            chrono::Local::now().format(layout::DIR_TIMESTAMP_FORMAT)
        ))
    }

    /// Downloads every regular file strictly smaller than the size cap.
    /// Per-file failures are recorded and skipped.
    pub async fn collect(
        &self,
        session: &dyn RemoteSession,
        source_dir: &str,
        cancel: &CancellationToken,
    ) -> Result<CollectionReport, LaunchError> {
        let entries = match session.list(source_dir).await {
            Ok(entries) => entries,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                self.note(&format!("Failed to list {}: {}\n", source_dir, err))
                    .await;
                return Err(err.into_kind(crate::errors::LaunchErrorKind::Transfer));
            }
        };
        let results_dir = self.results_dir();
        tokio::fs::create_dir_all(&results_dir).await.map_err(|err| {
            LaunchError::transfer(format!(
                "Failed to create results directory {}: {}",
                results_dir.display(),
                err
            ))
        })?;

        let cap = self.spec.max_download_bytes;
        let mut report = CollectionReport {
            results_dir: results_dir.clone(),
            ..CollectionReport::default()
        };
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            if cancel.is_cancelled() {
                return Err(LaunchError::cancelled("Cancelled while downloading results"));
            }
            if entry.size >= cap {
                let message = format!(
                    "Skipped {} ({} bytes, limit {} bytes)\n",
                    entry.path, entry.size, cap
                );
                self.note(&message).await;
                self.logger.warn(
                    "Skipped oversized result",
                    Some(&json!({ "path": entry.path, "size": entry.size, "limit": cap })),
                );
                report.skipped.push(entry.name);
                continue;
            }
            let local = results_dir.join(&entry.name);
            match session.download(&entry.path, &local).await {
                Ok(bytes) => {
                    let message = format!(
                        "Downloaded {} to {} ({} bytes)\n",
                        entry.path,
                        local.display(),
                        bytes
                    );
                    self.note(&message).await;
                    self.logger.info(
                        "Downloaded result",
                        Some(&json!({ "path": entry.path, "bytes": bytes })),
                    );
                    report.downloaded.push(entry.name);
                }
                Err(err) => {
                    let message = format!("Failed to download {}: {}\n", entry.path, err);
                    self.note(&message).await;
                    self.logger.warn(
                        "Result download failed",
                        Some(&json!({ "path": entry.path, "error": err.message })),
                    );
                    report.failed.push(entry.name);
                }
            }
        }
        Ok(report)
    }

    async fn note(&self, message: &str) {
        if let Err(err) = self.output.append_stdout(message).await {
            self.logger
                .warn("Failed to write stdout file", Some(&json!({ "error": err.message })));
        }
    }
}
