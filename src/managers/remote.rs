use crate::constants::limits::{DRAIN_GRACE_MS, LOG_SUBSTRING_LENGTH};
use crate::errors::{LaunchError, LaunchErrorKind};
use crate::managers::JobContext;
use crate::services::collector::ResultCollector;
use crate::services::credentials::Credentials;
use crate::services::logger::Logger;
use crate::services::monitor::{wait_for_exit, MonitorOutcome};
use crate::services::output::{OutputHeader, Stream};
use crate::services::plan::CommandPlan;
use crate::services::remote::{RemoteExecutionService, RemoteSession, RemoteTarget};
use crate::services::stager::{stage_remote, LaunchScript};
use crate::utils::redact::redact_text;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Runs a job through a [`RemoteExecutionService`] session.
#[derive(Clone)]
pub struct RemoteLauncher {
    logger: Logger,
    service: Arc<dyn RemoteExecutionService>,
}

impl RemoteLauncher {
    pub fn new(logger: &Logger, service: Arc<dyn RemoteExecutionService>) -> Self {
        Self {
            logger: logger.child("remote"),
            service,
        }
    }

    pub async fn run(&self, ctx: &JobContext, credentials: &Credentials) -> Result<(), LaunchError> {
        let spec = &ctx.spec;
        let target = RemoteTarget {
            host: spec.hostname.clone(),
            port: spec.port,
        };
        self.logger.info(
            "Connecting",
            Some(&json!({ "host": target.host, "port": target.port, "user": credentials.username() })),
        );
        let session = self
            .service
            .connect(&target, credentials)
            .await
            .map_err(|err| err.into_kind(LaunchErrorKind::Connection))?;

        let result = self.run_in_session(ctx, session.as_ref()).await;
        if let Err(err) = session.close().await {
            self.logger
                .warn("Failed to close remote session", Some(&json!({ "error": err.message })));
        }
        result
    }

    async fn run_in_session(
        &self,
        ctx: &JobContext,
        session: &dyn RemoteSession,
    ) -> Result<(), LaunchError> {
        let spec = &ctx.spec;
        let home = session.home_dir().await?;
        let remote_dir = spec.remote_working_dir(&home);
        let (plan, files) = CommandPlan::build(spec, &spec.remote_working_dir_token());
        ctx.output
            .write_header(&OutputHeader::for_run(spec, &plan.command, &remote_dir))
            .await?;

        if ctx.cancel.is_cancelled() {
            return Err(LaunchError::cancelled("Cancelled before staging"));
        }
        session
            .mkdir(&remote_dir)
            .await
            .map_err(|err| err.into_kind(LaunchErrorKind::Transfer))?;
        let script = LaunchScript::generate(spec, &plan);
        stage_remote(
            session,
            spec,
            &files,
            &script,
            &remote_dir,
            &spec.local_launch_dir(),
            &ctx.cancel,
            &self.logger,
        )
        .await?;

        if ctx.cancel.is_cancelled() {
            return Err(LaunchError::cancelled("Cancelled before remote start"));
        }
        let command = script.launch_command(spec);
        self.logger.info(
            "Starting remote job",
            Some(&json!({
                "dir": remote_dir,
                "command": redact_text(&command, LOG_SUBSTRING_LENGTH, None),
                "stages": plan.stages.len(),
            })),
        );
        let process = session
            .start(&remote_dir, &command)
            .await
            .map_err(|err| err.into_kind(LaunchErrorKind::StageExecution))?;
        ctx.active.set(process.handle.clone());
        let stdout = ctx.output.spawn_drain(Stream::Stdout, process.stdout);
        let stderr = ctx.output.spawn_drain(Stream::Stderr, process.stderr);

        let code = match wait_for_exit(&process.handle, &ctx.cancel).await {
            MonitorOutcome::Cancelled => {
                stdout.abort();
                stderr.abort();
                return Err(LaunchError::cancelled("Cancelled while remote job was running"));
            }
            MonitorOutcome::Exited(code) => {
                let grace = Duration::from_millis(DRAIN_GRACE_MS);
                tokio::join!(
                    stdout.settle(grace, &ctx.cancel),
                    stderr.settle(grace, &ctx.cancel)
                );
                code
            }
        };
        if ctx.cancel.is_cancelled() {
            return Err(LaunchError::cancelled("Cancelled while remote output was draining"));
        }
        self.logger
            .info("Remote job finished", Some(&json!({ "exit_code": code })));

        let collector = ResultCollector::new(spec, &ctx.output, &self.logger);
        let source = collector.source_dir(&home, &remote_dir);
        match collector.collect(session, &source, &ctx.cancel).await {
            Ok(report) => self.logger.info(
                "Collected results",
                Some(&json!({
                    "dir": report.results_dir.display().to_string(),
                    "downloaded": report.downloaded.len(),
                    "skipped": report.skipped.len(),
                    "failed": report.failed.len(),
                })),
            ),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => self.logger.warn(
                "Result collection failed",
                Some(&json!({ "source": source, "error": err.message })),
            ),
        }

        if code != 0 {
            return Err(LaunchError::stage_execution(format!(
                "Remote job exited with code {}",
                code
            ))
            .with_details(json!({ "exit_code": code })));
        }
        Ok(())
    }
}
