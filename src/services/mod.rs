pub mod collector;
pub mod credentials;
pub mod handle;
pub mod job_spec;
pub mod logger;
pub mod monitor;
pub mod output;
pub mod params;
pub mod plan;
pub mod remote;
pub mod stager;
pub mod status;
pub mod validation;
