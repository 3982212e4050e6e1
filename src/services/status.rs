use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    NeedsInfo,
    Processing,
    Processed,
    InfoError,
    ReadyToProcess,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Processed | JobStatus::InfoError | JobStatus::ReadyToProcess
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::NeedsInfo => "needs_info",
            JobStatus::Processing => "processing",
            JobStatus::Processed => "processed",
            JobStatus::InfoError => "info_error",
            JobStatus::ReadyToProcess => "ready_to_process",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable job status. Once a terminal status is published it never changes.
#[derive(Clone)]
pub struct StatusCell {
    tx: Arc<watch::Sender<JobStatus>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobStatus::NotStarted);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> JobStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }

    /// Publishes `next` unless the current status is terminal. Returns the
    /// status held afterwards.
    pub fn advance(&self, next: JobStatus) -> JobStatus {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        self.get()
    }

    pub async fn wait_terminal(&self) -> JobStatus {
        let mut rx = self.subscribe();
        let reached = rx.wait_for(|status| status.is_terminal()).await.map(|status| *status);
        reached.unwrap_or_else(|_| self.get())
    }
}
