use crate::constants::limits::{DRAIN_GRACE_MS, LOG_SUBSTRING_LENGTH};
use crate::errors::LaunchError;
use crate::managers::JobContext;
use crate::services::logger::Logger;
use crate::services::monitor::{wait_for_exit, MonitorOutcome};
use crate::services::output::{OutputHeader, Stream};
use crate::services::plan::CommandPlan;
use crate::services::stager::stage_local;
use crate::utils::redact::redact_text;
use serde_json::json;
use std::time::Duration;

mod exec;

/// Runs a job's stages as local subprocesses, one after another.
#[derive(Clone)]
pub struct LocalLauncher {
    logger: Logger,
}

impl LocalLauncher {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.child("local"),
        }
    }

    pub async fn run(&self, ctx: &JobContext) -> Result<(), LaunchError> {
        let spec = &ctx.spec;
        let working_dir = spec.local_working_dir();
        let working_dir_text = working_dir.display().to_string();
        let (plan, files) = CommandPlan::build(spec, &working_dir_text);

        ctx.output
            .write_header(&OutputHeader::for_run(spec, &plan.command, &working_dir_text))
            .await?;
        let staged = stage_local(spec, &files, &working_dir, &ctx.cancel, &self.logger).await?;
        self.logger.info(
            "Prepared local working directory",
            Some(&json!({ "dir": working_dir_text, "staged": staged, "stages": plan.stages.len() })),
        );

        for (index, stage) in plan.stages.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(LaunchError::cancelled("Cancelled before stage start"));
            }
            tokio::fs::create_dir_all(&working_dir).await.map_err(|err| {
                LaunchError::stage_execution(format!(
                    "Failed to create working directory {}: {}",
                    working_dir_text, err
                ))
            })?;

            self.logger.info(
                "Starting stage",
                Some(&json!({
                    "index": index + 1,
                    "of": plan.stages.len(),
                    "command": redact_text(stage, LOG_SUBSTRING_LENGTH, None),
                })),
            );
            let process = exec::spawn_stage(spec, stage, &working_dir)?;
            ctx.active.set(process.handle.clone());
            let stdout = ctx.output.spawn_drain(Stream::Stdout, process.stdout);
            let stderr = ctx.output.spawn_drain(Stream::Stderr, process.stderr);

            match wait_for_exit(&process.handle, &ctx.cancel).await {
                MonitorOutcome::Cancelled => {
                    stdout.abort();
                    stderr.abort();
                    return Err(LaunchError::cancelled("Cancelled while stage was running"));
                }
                MonitorOutcome::Exited(code) => {
                    let grace = Duration::from_millis(DRAIN_GRACE_MS);
                    tokio::join!(
                        stdout.settle(grace, &ctx.cancel),
                        stderr.settle(grace, &ctx.cancel)
                    );
                    if ctx.cancel.is_cancelled() {
                        return Err(LaunchError::cancelled("Cancelled while stage output was draining"));
                    }
                    self.logger.debug(
                        "Stage finished",
                        Some(&json!({ "index": index + 1, "exit_code": code })),
                    );
                    if code != 0 {
                        return Err(LaunchError::stage_execution(format!(
                            "Stage {} exited with code {}: {}",
                            index + 1,
                            code,
                            stage
                        ))
                        .with_details(json!({ "exit_code": code, "stage": index + 1 })));
                    }
                }
            }
        }
        Ok(())
    }
}
