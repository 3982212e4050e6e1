use crate::constants::limits::LOG_SUBSTRING_LENGTH;
use crate::errors::LaunchError;
use crate::managers::local::LocalLauncher;
use crate::managers::remote::RemoteLauncher;
use crate::managers::ssh::SshRemoteService;
use crate::managers::JobContext;
use crate::services::credentials::{CredentialForm, CredentialSlot, CredentialWaiter, Credentials};
use crate::services::handle::ActiveHandle;
use crate::services::job_spec::JobSpec;
use crate::services::logger::Logger;
use crate::services::output::OutputLog;
use crate::services::params::Parameters;
use crate::services::remote::RemoteExecutionService;
use crate::services::status::{JobStatus, StatusCell};
use crate::utils::redact::{redact_pairs, redact_text};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One launchable job: owns its status cell, credential slot, cancellation
/// token and worker task.
pub struct JobLauncher {
    job_id: String,
    logger: Logger,
    status: StatusCell,
    cancel: CancellationToken,
    active: ActiveHandle,
    credentials: Mutex<Arc<CredentialSlot>>,
    form: Mutex<Option<CredentialForm>>,
    worker: Mutex<Option<JoinHandle<JobStatus>>>,
    started: AtomicBool,
    remote: Arc<dyn RemoteExecutionService>,
}

impl JobLauncher {
    pub fn new(logger: &Logger) -> Self {
        let job_id = uuid::Uuid::new_v4().to_string();
        let logger = logger.child(&format!("job:{}", &job_id[..8]));
        let remote: Arc<dyn RemoteExecutionService> = Arc::new(SshRemoteService::new(&logger));
        Self {
            job_id,
            logger,
            status: StatusCell::new(),
            cancel: CancellationToken::new(),
            active: ActiveHandle::default(),
            credentials: Mutex::new(Arc::new(CredentialSlot::closed())),
            form: Mutex::new(None),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
            remote,
        }
    }

    pub fn with_remote_service(mut self, service: Arc<dyn RemoteExecutionService>) -> Self {
        self.remote = service;
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Validates the job and starts its worker. Returns at once with
    /// `Processing` (local), `NeedsInfo` (remote) or `InfoError`.
    pub fn execute(&self, params: Parameters) -> JobStatus {
        if self.started.swap(true, Ordering::SeqCst) {
            self.logger.warn("execute called more than once", None);
            return JobStatus::InfoError;
        }
        if self.cancel.is_cancelled() {
            return self.status.advance(JobStatus::ReadyToProcess);
        }

        self.logger
            .debug("Job parameters", Some(&redact_pairs(params.iter())));
        let spec = match JobSpec::from_params(params) {
            Ok(spec) => Arc::new(spec),
            Err(err) => return self.reject(err),
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                return self.reject(LaunchError::internal(
                    "execute must be called from within a tokio runtime",
                ))
            }
        };

        let waiter = if spec.is_local() {
            self.status.advance(JobStatus::Processing);
            None
        } else {
            let (slot, waiter) = CredentialSlot::open();
            if let Ok(mut guard) = self.credentials.lock() {
                *guard = Arc::new(slot);
            }
            if let Ok(mut guard) = self.form.lock() {
                *guard = Some(CredentialForm::for_host(&spec.hostname));
            }
            self.status.advance(JobStatus::NeedsInfo);
            Some(waiter)
        };

        self.logger.info(
            "Job accepted",
            Some(&json!({
                "host": spec.hostname,
                "local": spec.is_local(),
                "launch_dir": spec.launch_dir_name,
            })),
        );
        let worker = Worker {
            spec,
            logger: self.logger.clone(),
            status: self.status.clone(),
            cancel: self.cancel.clone(),
            active: self.active.clone(),
            remote: self.remote.clone(),
        };
        let task = runtime.spawn(worker.run(waiter));
        if let Ok(mut guard) = self.worker.lock() {
            *guard = Some(task);
        }
        self.status.get()
    }

    fn reject(&self, err: LaunchError) -> JobStatus {
        self.logger.error(
            &format!("Job rejected: {}", err),
            err.details.as_ref(),
        );
        self.status.advance(JobStatus::InfoError)
    }

    /// Login form while the job waits for credentials.
    pub fn credential_form(&self) -> Option<CredentialForm> {
        if self.status.get() != JobStatus::NeedsInfo {
            return None;
        }
        self.form.lock().ok().and_then(|guard| guard.clone())
    }

    /// Hands credentials to the waiting worker. Only the first non-empty
    /// submission is accepted; anything else returns `InfoError` and leaves the
    /// job untouched.
    pub fn submit_form(&self, credentials: Option<Credentials>) -> JobStatus {
        if self.status.get() != JobStatus::NeedsInfo {
            self.logger.warn("Credentials submitted while no form is open", None);
            return JobStatus::InfoError;
        }
        let slot = match self.credentials.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return JobStatus::InfoError,
        };
        match slot.submit(credentials) {
            Ok(()) => self.status.advance(JobStatus::Processing),
            Err(err) => {
                self.logger.warn(&format!("Credentials rejected: {}", err), None);
                JobStatus::InfoError
            }
        }
    }

    /// Stops the job: kills the running process, skips remaining stages and
    /// downloads.
    pub fn cancel(&self) -> JobStatus {
        self.cancel.cancel();
        if let Some(command) = self.active.kill() {
            self.logger.info(
                "Killed running process",
                Some(&json!({ "command": redact_text(&command, LOG_SUBSTRING_LENGTH, None) })),
            );
        }
        self.status.advance(JobStatus::ReadyToProcess);
        JobStatus::ReadyToProcess
    }

    pub async fn wait_terminal(&self) -> JobStatus {
        self.status.wait_terminal().await
    }

    /// Waits for the worker task to finish. Returns the final status.
    pub async fn join(&self) -> JobStatus {
        let task = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            if task.await.is_err() {
                self.logger.error("Job worker panicked", None);
                self.status.advance(JobStatus::InfoError);
            }
        }
        self.status.get()
    }
}

impl Drop for JobLauncher {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.active.kill();
    }
}

struct Worker {
    spec: Arc<JobSpec>,
    logger: Logger,
    status: StatusCell,
    cancel: CancellationToken,
    active: ActiveHandle,
    remote: Arc<dyn RemoteExecutionService>,
}

impl Worker {
    async fn run(self, waiter: Option<CredentialWaiter>) -> JobStatus {
        let outcome = self.drive(waiter).await;
        let next = match outcome {
            Ok(()) => JobStatus::Processed,
            Err(err) if err.is_cancelled() => {
                self.logger.info(&format!("Job cancelled: {}", err), None);
                JobStatus::ReadyToProcess
            }
            Err(err) => {
                self.logger.error(&format!("Job failed: {}", err), err.details.as_ref());
                JobStatus::InfoError
            }
        };
        let published = self.status.advance(next);
        self.logger
            .info("Job finished", Some(&json!({ "status": published.as_str() })));
        published
    }

    async fn drive(&self, waiter: Option<CredentialWaiter>) -> Result<(), LaunchError> {
        if self.cancel.is_cancelled() {
            return Err(LaunchError::cancelled("Cancelled before start"));
        }
        let credentials = match waiter {
            Some(waiter) => {
                let credentials = waiter.wait(&self.cancel).await?;
                self.status.advance(JobStatus::Processing);
                Some(credentials)
            }
            None => None,
        };
        if self.cancel.is_cancelled() {
            return Err(LaunchError::cancelled("Cancelled before start"));
        }

        let output = OutputLog::open(&self.spec.std_out_file, &self.spec.std_err_file).await?;
        let ctx = JobContext {
            spec: self.spec.clone(),
            output: output.clone(),
            cancel: self.cancel.clone(),
            active: self.active.clone(),
        };
        let result = match credentials {
            None => LocalLauncher::new(&self.logger).run(&ctx).await,
            Some(credentials) => {
                let logger = self.logger.with_secret(credentials.password());
                RemoteLauncher::new(&logger, self.remote.clone())
                    .run(&ctx, &credentials)
                    .await
            }
        };
        if let Err(err) = result.as_ref() {
            if !err.is_cancelled() {
                let text = match err.hint.as_deref() {
                    Some(hint) => format!("{}\n{}\n", err, hint),
                    None => format!("{}\n", err),
                };
                if let Err(write_err) = output.append_stderr(&text).await {
                    self.logger.warn(
                        "Failed to write error to stderr file",
                        Some(&json!({ "error": write_err.message })),
                    );
                }
            }
        }
        result
    }
}
