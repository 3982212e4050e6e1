pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_CLOSE_GRACE_MS: u64 = 2_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
    pub const REMOTE_IDLE_POLL_MS: u64 = 20;
}

pub mod limits {
    pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 52_428_800;
    pub const STREAM_CHUNK_BYTES: usize = 8192;
    pub const STREAM_CHANNEL_DEPTH: usize = 64;
    /// How long output pipes may stay open after the process exited.
    pub const DRAIN_GRACE_MS: u64 = 2_000;
    pub const LOG_SUBSTRING_LENGTH: usize = 200;
    pub const PBS_CORES_PER_NODE: u32 = 16;
    pub const PBS_MAX_NODES: u32 = 18_688;
}

pub mod localhost {
    pub const NAMES: &[&str] = &["127.0.0.1", "localhost", "localhost.localdomain"];
}

pub mod hosts {
    /// Cray host that launches through `aprun`/`qsub` instead of `mpiexec`.
    pub const DESIGNATED_HPC_HOST: &str = "titan.ccs.ornl.gov";
}

pub mod layout {
    pub const JOBS_DIR: &str = "jobs";
    pub const LAUNCH_DIR_PREFIX: &str = "iceLaunch_";
    pub const REMOTE_RESULTS_PREFIX: &str = "remoteIceLaunch_";
    pub const REMOTE_JOBS_ROOT: &str = "ICEJobs";
    pub const LAUNCH_SCRIPT_PREFIX: &str = "launchJob_";
    pub const DIR_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
    pub const HEADER_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
}

pub mod keys {
    pub const EXECUTABLE: &str = "executable";
    pub const INPUT_FILE: &str = "inputFile";
    pub const STD_OUT_FILE_NAME: &str = "stdOutFileName";
    pub const STD_ERR_FILE_NAME: &str = "stdErrFileName";
    pub const HOSTNAME: &str = "hostname";
    pub const PORT: &str = "port";
    pub const PROJECT_SPACE_DIR: &str = "projectSpaceDir";
    pub const UPLOAD_INPUT: &str = "uploadInput";
    pub const NO_APPEND_INPUT: &str = "noAppendInput";
    pub const INSTALL_DIR: &str = "installDir";
    pub const WORKING_DIR: &str = "workingDir";
    pub const LOCAL_JOB_LAUNCH_DIRECTORY: &str = "localJobLaunchDirectory";
    pub const NUM_PROCS: &str = "numProcs";
    pub const NUM_OMP_THREADS: &str = "numOMPThreads";
    pub const NUM_TBB_THREADS: &str = "numTBBThreads";
    pub const OS: &str = "os";
    pub const ACCOUNT_CODE: &str = "accountCode";
    pub const DOWNLOAD_DIRECTORY: &str = "downloadDirectory";
    pub const MAX_DOWNLOAD_SIZE: &str = "maxDownloadSize";
}
