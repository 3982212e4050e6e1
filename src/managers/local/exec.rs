use crate::errors::LaunchError;
use crate::services::handle::{ExecutionHandle, SpawnedProcess};
use crate::services::job_spec::JobSpec;
use std::path::Path;
use std::process::Stdio;

fn shell_command(spec: &JobSpec, stage: &str) -> tokio::process::Command {
    if spec.is_windows() {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(stage);
        return cmd;
    }
    let program = if Path::new("/bin/bash").exists() {
        "/bin/bash"
    } else {
        "sh"
    };
    let mut cmd = tokio::process::Command::new(program);
    cmd.arg("-c").arg(stage);
    cmd
}

/// Starts one stage and hands back its handle and output pipes. A reaper task
/// owns the child and publishes the exit code or kills it on request.
pub(super) fn spawn_stage(
    spec: &JobSpec,
    stage: &str,
    working_dir: &Path,
) -> Result<SpawnedProcess, LaunchError> {
    let mut cmd = shell_command(spec, stage);
    cmd.current_dir(working_dir);
    if spec.num_omp_threads > 1 {
        cmd.env("OMP_NUM_THREADS", spec.num_omp_threads.to_string());
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        LaunchError::stage_execution(format!("Failed to spawn stage '{}': {}", stage, err))
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LaunchError::internal("Stage stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LaunchError::internal("Stage stderr pipe missing"))?;

    let (handle, reporter) = ExecutionHandle::channel(stage);
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
