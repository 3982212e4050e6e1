pub mod constants;
pub mod errors;
pub mod managers;
pub mod services;
pub mod utils;

pub use errors::{LaunchError, LaunchErrorKind};
pub use managers::jobs::JobLauncher;
pub use services::credentials::{CredentialForm, Credentials};
pub use services::params::Parameters;
pub use services::status::JobStatus;
