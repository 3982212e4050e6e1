use crate::services::handle::ExecutionHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Exited(i32),
    Cancelled,
}

/// Waits for the handle to finish. Cancellation kills the handle and returns
/// without waiting for the process to go away.
pub async fn wait_for_exit(handle: &ExecutionHandle, cancel: &CancellationToken) -> MonitorOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            handle.kill();
            MonitorOutcome::Cancelled
        }
        code = handle.wait() => MonitorOutcome::Exited(code),
    }
}
