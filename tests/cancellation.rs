mod common;
use common::{find_results_dir, job_params, read, stage_output, tmp_dir, FakeRemote, ENV_LOCK};

use hpc_launch::services::logger::Logger;
use hpc_launch::{Credentials, JobLauncher, JobStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cancel_right_after_execute_starts_nothing() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-early");

    let job = JobLauncher::new(&Logger::new("test"));
    job.execute(job_params(&root, "localhost", "touch started"));
    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    assert_eq!(job.status(), JobStatus::ReadyToProcess);
    assert_eq!(job.join().await, JobStatus::ReadyToProcess);
    assert!(!root.join("jobs/run1/started").exists());
    assert!(!root.join("out").exists());
}

#[tokio::test]
async fn cancel_kills_running_stage_and_skips_the_rest() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-running");

    let job = JobLauncher::new(&Logger::new("test"));
    job.execute(job_params(&root, "localhost", "touch begun; sleep 30; touch after"));
    for _ in 0..100 {
        if root.join("jobs/run1/begun").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    let status = tokio::time::timeout(Duration::from_secs(10), job.join())
        .await
        .expect("worker stops promptly after cancel");
    assert_eq!(status, JobStatus::ReadyToProcess);
    assert!(root.join("jobs/run1/begun").exists());
    assert!(!root.join("jobs/run1/after").exists());
}

#[tokio::test]
async fn cancel_while_waiting_for_credentials() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-creds");
    let remote = FakeRemote::new(&root);

    let job = JobLauncher::new(&Logger::new("test")).with_remote_service(Arc::new(remote.clone()));
    assert_eq!(
        job.execute(job_params(&root, "cluster.example.org", "echo hi")),
        JobStatus::NeedsInfo
    );
    tokio::task::yield_now().await;
    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    let status = tokio::time::timeout(Duration::from_secs(5), job.join())
        .await
        .expect("credential wait is cancellable");
    assert_eq!(status, JobStatus::ReadyToProcess);
    assert!(!remote.called("connect"));
}

#[tokio::test]
async fn terminal_status_survives_late_cancel() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-late");

    let job = JobLauncher::new(&Logger::new("test"));
    job.execute(job_params(&root, "localhost", "true"));
    assert_eq!(job.join().await, JobStatus::Processed);
    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    assert_eq!(job.status(), JobStatus::Processed);
}

#[tokio::test]
async fn cancel_while_output_pipe_is_held_open() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-drain");

    let job = JobLauncher::new(&Logger::new("test"));
    job.execute(job_params(&root, "localhost", "sleep 30 & echo started"));
    for _ in 0..200 {
        if stage_output(&read(root.join("out/stdout.txt"))).contains("started\n") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    let status = tokio::time::timeout(Duration::from_secs(5), job.join())
        .await
        .expect("draining observes cancellation");
    assert_eq!(status, JobStatus::ReadyToProcess);
}

#[tokio::test]
async fn cancel_remote_job_skips_download_and_closes_session() {
    let _guard = ENV_LOCK.lock().await;
    let root = tmp_dir("hpc-launch-cancel-remote");
    let remote = FakeRemote::new(&root);

    let job = JobLauncher::new(&Logger::new("test")).with_remote_service(Arc::new(remote.clone()));
    job.execute(job_params(&root, "cluster.example.org", "sleep 30"));
    assert_eq!(
        job.submit_form(Some(Credentials::new("ops", "pw"))),
        JobStatus::Processing
    );
    for _ in 0..200 {
        if remote.called("start") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(job.cancel(), JobStatus::ReadyToProcess);
    let status = tokio::time::timeout(Duration::from_secs(10), job.join())
        .await
        .expect("remote job stops promptly after cancel");
    assert_eq!(status, JobStatus::ReadyToProcess);

    assert!(remote.called("start"));
    assert!(!remote.called("list"));
    assert!(!remote.called("download"));
    assert_eq!(remote.calls().last().map(String::as_str), Some("close"));
    assert!(find_results_dir(&root).is_none());
}
