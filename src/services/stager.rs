use crate::constants::{layout, limits};
use crate::errors::LaunchError;
use crate::services::job_spec::{join_remote, JobSpec};
use crate::services::logger::Logger;
use crate::services::plan::{CommandPlan, FileTable};
use crate::services::remote::RemoteSession;
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::user_paths::resolve_against;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Shell script that runs every stage on the remote host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchScript {
    pub file_name: String,
    pub content: String,
}

impl LaunchScript {
    pub fn generate(spec: &JobSpec, plan: &CommandPlan) -> Self {
        let file_name = format!(
            "{}{}.sh",
            layout::LAUNCH_SCRIPT_PREFIX,
            chrono::Local::now().format(layout::DIR_TIMESTAMP_FORMAT)
        );
        let mut content = String::new();
        if spec.is_designated_host() {
            let nodes = std::cmp::min(
                spec.num_procs / limits::PBS_CORES_PER_NODE + 1,
                limits::PBS_MAX_NODES,
            );
            content.push_str("#!/bin/bash\n");
            content.push_str("# Begin PBS directives\n");
            content.push_str(&format!(
                "#PBS -A {}\n",
                spec.account_code.as_deref().unwrap_or_default()
            ));
            content.push_str(&format!("#PBS -N {}\n", spec.launch_dir_name));
            content.push_str("#PBS -j oe\n");
            content.push_str(&format!("#PBS -l walltime=1:00:00,nodes={}\n", nodes));
            content.push_str("# End PBS directives and begin shell commands\n");
        } else {
            content.push_str("#!/bin/sh\n");
        }
        content.push_str("set -e\n");
        if spec.num_omp_threads > 1 {
            content.push_str(&format!("export OMP_NUM_THREADS={}\n", spec.num_omp_threads));
        }
        for stage in &plan.stages {
            content.push_str(stage);
            content.push('\n');
        }
        Self { file_name, content }
    }

    /// Command that starts the script from inside the remote working directory.
    pub fn launch_command(&self, spec: &JobSpec) -> String {
        if spec.is_designated_host() {
            format!("qsub {}", self.file_name)
        } else {
            format!("sh ./{}", self.file_name)
        }
    }
}

fn cancelled(cancel: &CancellationToken) -> Result<(), LaunchError> {
    if cancel.is_cancelled() {
        return Err(LaunchError::cancelled("Cancelled while staging files"));
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copies staged inputs into the local working directory. Returns the number of
/// files copied.
pub async fn stage_local(
    spec: &JobSpec,
    files: &FileTable,
    working_dir: &Path,
    cancel: &CancellationToken,
    logger: &Logger,
) -> Result<usize, LaunchError> {
    tokio::fs::create_dir_all(working_dir).await.map_err(|err| {
        LaunchError::transfer(format!(
            "Failed to create working directory {}: {}",
            working_dir.display(),
            err
        ))
    })?;
    if !spec.upload_input {
        return Ok(0);
    }
    let root = spec.project_root();
    let mut copied = 0;
    for (short, full) in files.iter() {
        cancelled(cancel)?;
        let source = resolve_against(&root, full);
        let dest = working_dir.join(short);
        if same_file(&source, &dest) {
            continue;
        }
        tokio::fs::copy(&source, &dest).await.map_err(|err| {
            LaunchError::transfer(format!(
                "Failed to copy {} into {}: {}",
                source.display(),
                working_dir.display(),
                err
            ))
            .with_details(json!({ "source": source.display().to_string() }))
        })?;
        logger.debug(
            "Staged input",
            Some(&json!({ "file": short, "dest": dest.display().to_string() })),
        );
        copied += 1;
    }
    Ok(copied)
}

/// Uploads staged inputs and the launch script into `remote_dir`. The script is
/// first written into `scratch_dir` on the local side.
pub async fn stage_remote(
    session: &dyn RemoteSession,
    spec: &JobSpec,
    files: &FileTable,
    script: &LaunchScript,
    remote_dir: &str,
    scratch_dir: &Path,
    cancel: &CancellationToken,
    logger: &Logger,
) -> Result<(), LaunchError> {
    if spec.upload_input {
        let root = spec.project_root();
        for (short, full) in files.iter() {
            cancelled(cancel)?;
            let source = resolve_against(&root, full);
            if !source.is_file() {
                return Err(LaunchError::transfer(format!(
                    "Input file is missing or unreadable: {}",
                    source.display()
                )));
            }
            let target = join_remote(remote_dir, short);
            session
                .upload(&source, &target)
                .await
                .map_err(|err| err.into_kind(crate::errors::LaunchErrorKind::Transfer))?;
            logger.debug("Uploaded input", Some(&json!({ "file": short, "remote": target })));
        }
    }

    cancelled(cancel)?;
    let local_script: PathBuf = scratch_dir.join(&script.file_name);
    atomic_write_text_file(&local_script, &script.content, 0o755)
        .await
        .map_err(|err| {
            LaunchError::transfer(format!(
                "Failed to write launch script {}: {}",
                local_script.display(),
                err
            ))
        })?;
    let target = join_remote(remote_dir, &script.file_name);
    session
        .upload(&local_script, &target)
        .await
        .map_err(|err| err.into_kind(crate::errors::LaunchErrorKind::Transfer))?;
    logger.info("Uploaded launch script", Some(&json!({ "remote": target })));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::params::Parameters;

    fn spec(host: &str, procs: &str) -> JobSpec {
        JobSpec::from_params(
            Parameters::new()
                .with("executable", "solve")
                .with("hostname", host)
                .with("stdOutFileName", "/tmp/o")
                .with("stdErrFileName", "/tmp/e")
                .with("uploadInput", "false")
                .with("numProcs", procs)
                .with("accountCode", "ABC123")
                .with("localJobLaunchDirectory", "run7"),
        )
        .unwrap()
    }

    #[test]
    fn designated_host_gets_pbs_header() {
        let spec = spec("titan.ccs.ornl.gov", "40");
        let (plan, _) = CommandPlan::build(&spec, "$HOME/ICEJobs/run7");
        let script = LaunchScript::generate(&spec, &plan);
        let lines: Vec<&str> = script.content.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[2], "#PBS -A ABC123");
        assert_eq!(lines[3], "#PBS -N run7");
        assert_eq!(lines[5], "#PBS -l walltime=1:00:00,nodes=3");
        assert!(script.content.ends_with("aprun -n 40 solve\n"));
        assert!(script.launch_command(&spec).starts_with("qsub launchJob_"));
    }

    #[test]
    fn generic_host_runs_stages_in_order() {
        let spec = JobSpec::from_params(
            Parameters::new()
                .with("executable", "prep; run")
                .with("hostname", "cluster.example.org")
                .with("stdOutFileName", "/tmp/o")
                .with("stdErrFileName", "/tmp/e")
                .with("uploadInput", "false"),
        )
        .unwrap();
        let (plan, _) = CommandPlan::build(&spec, "/w");
        let script = LaunchScript::generate(&spec, &plan);
        assert!(!script.content.contains("#PBS"));
        assert!(script.content.ends_with("prep\nrun\n"));
        assert!(script.file_name.starts_with("launchJob_"));
        assert!(script.file_name.ends_with(".sh"));
        assert_eq!(
            script.launch_command(&spec),
            format!("sh ./{}", script.file_name)
        );
    }

    #[test]
    fn node_count_is_capped() {
        let spec = spec("titan.ccs.ornl.gov", "999999999");
        let (plan, _) = CommandPlan::build(&spec, "/w");
        let script = LaunchScript::generate(&spec, &plan);
        assert!(script.content.contains("nodes=18688\n"));
    }
}
