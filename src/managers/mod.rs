use crate::services::handle::ActiveHandle;
use crate::services::job_spec::JobSpec;
use crate::services::output::OutputLog;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod jobs;
pub mod local;
pub mod remote;
pub mod ssh;

/// State shared between the job object and the launcher running its worker.
#[derive(Clone)]
pub struct JobContext {
    pub spec: Arc<JobSpec>,
    pub output: OutputLog,
    pub cancel: CancellationToken,
    pub active: ActiveHandle,
}
