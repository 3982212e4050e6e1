use crate::constants::{hosts, keys, layout, limits, localhost, network};
use crate::errors::LaunchError;
use crate::services::params::Parameters;
use crate::services::validation::Validation;
use crate::utils::feature_flags::{env_positive_u64, flag_or, is_truthy};
use crate::utils::text::random_token;
use crate::utils::user_paths::{local_hostname, resolve_against};
use std::path::PathBuf;

/// Validated, read-only description of one job.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub params: Parameters,
    pub executable: String,
    pub hostname: String,
    pub port: u16,
    pub num_procs: u32,
    pub num_omp_threads: u32,
    pub num_tbb_threads: u32,
    pub install_dir: Option<String>,
    pub working_dir: Option<String>,
    pub project_space_dir: Option<PathBuf>,
    pub launch_dir_name: String,
    pub upload_input: bool,
    pub append_input: bool,
    pub input_file: Option<String>,
    pub account_code: Option<String>,
    pub os: Option<String>,
    pub std_out_file: PathBuf,
    pub std_err_file: PathBuf,
    pub download_directory: Option<String>,
    pub max_download_bytes: u64,
}

impl JobSpec {
    pub fn from_params(params: Parameters) -> Result<Self, LaunchError> {
        let validation = Validation::new();
        let upload_input = flag_or(params.get(keys::UPLOAD_INPUT), true);

        let mut required = vec![
            keys::EXECUTABLE,
            keys::HOSTNAME,
            keys::STD_OUT_FILE_NAME,
            keys::STD_ERR_FILE_NAME,
        ];
        if upload_input {
            required.push(keys::INPUT_FILE);
        }
        validation.ensure_present(&params, &required)?;

        let num_procs = validation.ensure_count(&params, keys::NUM_PROCS)?;
        let num_omp_threads = validation.ensure_count(&params, keys::NUM_OMP_THREADS)?;
        let num_tbb_threads = validation.ensure_count(&params, keys::NUM_TBB_THREADS)?;
        let port = validation.ensure_port(&params, keys::PORT, network::SSH_DEFAULT_PORT)?;
        let fallback_cap = env_positive_u64("HPC_LAUNCH_MAX_DOWNLOAD_BYTES")
            .unwrap_or(limits::DEFAULT_MAX_DOWNLOAD_BYTES);
        let max_download_bytes =
            validation.ensure_byte_size(&params, keys::MAX_DOWNLOAD_SIZE, fallback_cap)?;

        let project_space_dir = owned(&params, keys::PROJECT_SPACE_DIR).map(PathBuf::from);
        let project_root = project_space_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let launch_dir_name = owned(&params, keys::LOCAL_JOB_LAUNCH_DIRECTORY).unwrap_or_else(|| {
            format!(
                "{}{}_{}",
                layout::LAUNCH_DIR_PREFIX,
                chrono::Local::now().format(layout::DIR_TIMESTAMP_FORMAT),
                random_token(6)
            )
        });

        // presence was checked above
        let executable = owned(&params, keys::EXECUTABLE).unwrap_or_default();
        let hostname = owned(&params, keys::HOSTNAME).unwrap_or_default();
        let std_out_file = resolve_against(
            &project_root,
            &owned(&params, keys::STD_OUT_FILE_NAME).unwrap_or_default(),
        );
        let std_err_file = resolve_against(
            &project_root,
            &owned(&params, keys::STD_ERR_FILE_NAME).unwrap_or_default(),
        );
        let append_input = !params
            .get(keys::NO_APPEND_INPUT)
            .map(|v| is_truthy(v))
            .unwrap_or(false);

        Ok(Self {
            executable,
            hostname,
            port,
            num_procs,
            num_omp_threads,
            num_tbb_threads,
            install_dir: owned(&params, keys::INSTALL_DIR),
            working_dir: owned(&params, keys::WORKING_DIR),
            project_space_dir,
            launch_dir_name,
            upload_input,
            append_input,
            input_file: owned(&params, keys::INPUT_FILE),
            account_code: owned(&params, keys::ACCOUNT_CODE),
            os: owned(&params, keys::OS),
            std_out_file,
            std_err_file,
            download_directory: owned(&params, keys::DOWNLOAD_DIRECTORY),
            max_download_bytes,
            params,
        })
    }

    /// Project space directory, or the process working directory when unset.
    pub fn project_root(&self) -> PathBuf {
        self.project_space_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn is_local(&self) -> bool {
        let host = self.hostname.trim().to_lowercase();
        if localhost::NAMES.contains(&host.as_str()) {
            return true;
        }
        local_hostname()
            .map(|own| own.to_lowercase() == host)
            .unwrap_or(false)
    }

    pub fn is_designated_host(&self) -> bool {
        self.hostname.trim().eq_ignore_ascii_case(hosts::DESIGNATED_HPC_HOST)
    }

    pub fn is_windows(&self) -> bool {
        self.os
            .as_deref()
            .map(|os| os.to_lowercase().contains("win"))
            .unwrap_or(false)
    }

    /// `<project>/jobs/<launch dir name>`; also holds the generated launch
    /// script for remote runs.
    pub fn local_launch_dir(&self) -> PathBuf {
        self.project_root()
            .join(layout::JOBS_DIR)
            .join(&self.launch_dir_name)
    }

    pub fn local_working_dir(&self) -> PathBuf {
        match self.working_dir.as_deref() {
            Some(dir) => resolve_against(&self.project_root(), dir),
            None => self.local_launch_dir(),
        }
    }

    /// Remote working directory, absolute once joined with the remote home.
    pub fn remote_working_dir(&self, home: &str) -> String {
        match self.working_dir.as_deref() {
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => join_remote(home, dir),
            None => join_remote(
                home,
                &format!("{}/{}", layout::REMOTE_JOBS_ROOT, self.launch_dir_name),
            ),
        }
    }

    /// Value substituted for `${workingDir}` in remote commands.
    pub fn remote_working_dir_token(&self) -> String {
        match self.working_dir.as_deref() {
            Some(dir) => dir.to_string(),
            None => format!("$HOME/{}/{}", layout::REMOTE_JOBS_ROOT, self.launch_dir_name),
        }
    }
}

fn owned(params: &Parameters, key: &str) -> Option<String> {
    params.get_non_empty(key).map(str::to_string)
}

pub fn join_remote(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", child)
    } else {
        format!("{}/{}", base, child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Parameters {
        Parameters::new()
            .with("executable", "run")
            .with("hostname", "localhost")
            .with("stdOutFileName", "/tmp/out.txt")
            .with("stdErrFileName", "/tmp/err.txt")
            .with("inputFile", "/tmp/in.i")
    }

    #[test]
    fn input_file_required_only_when_uploading() {
        let params = base();
        let mut without = params.clone();
        without.remove("inputFile");
        assert!(JobSpec::from_params(without.clone()).is_err());
        without.insert("uploadInput", "false");
        let spec = JobSpec::from_params(without).unwrap();
        assert!(!spec.upload_input);
        assert!(spec.input_file.is_none());
    }

    #[test]
    fn defaults_are_applied() {
        let spec = JobSpec::from_params(base()).unwrap();
        assert_eq!(spec.num_procs, 1);
        assert_eq!(spec.port, 22);
        assert!(spec.append_input);
        assert!(spec.upload_input);
        assert!(spec.is_local());
        assert!(spec.launch_dir_name.starts_with("iceLaunch_"));
    }

    #[test]
    fn no_append_input_flag_is_read() {
        let spec = JobSpec::from_params(base().with("noAppendInput", "TRUE")).unwrap();
        assert!(!spec.append_input);
    }

    #[test]
    fn designated_host_and_windows_hints() {
        let spec = JobSpec::from_params(
            base().with("hostname", "TITAN.ccs.ornl.gov").with("os", "Windows 10"),
        )
        .unwrap();
        assert!(spec.is_designated_host());
        assert!(spec.is_windows());
        assert!(!spec.is_local());
    }

    #[test]
    fn working_directories_follow_launch_name() {
        let spec = JobSpec::from_params(
            base()
                .with("projectSpaceDir", "/work/project")
                .with("localJobLaunchDirectory", "run42"),
        )
        .unwrap();
        assert_eq!(spec.local_working_dir(), PathBuf::from("/work/project/jobs/run42"));
        assert_eq!(spec.remote_working_dir("/home/u"), "/home/u/ICEJobs/run42");
        assert_eq!(spec.remote_working_dir_token(), "$HOME/ICEJobs/run42");
    }

    #[test]
    fn working_dir_override_wins() {
        let spec = JobSpec::from_params(base().with("workingDir", "/scratch/job")).unwrap();
        assert_eq!(spec.local_working_dir(), PathBuf::from("/scratch/job"));
        assert_eq!(spec.remote_working_dir("/home/u"), "/scratch/job");
    }

    #[test]
    fn malformed_numbers_are_configuration_errors() {
        let err = JobSpec::from_params(base().with("numTBBThreads", "many")).unwrap_err();
        assert_eq!(err.kind, crate::errors::LaunchErrorKind::Configuration);
    }
}
