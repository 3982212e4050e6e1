use clap::{Args, Parser, Subcommand};
use hpc_launch::services::logger::Logger;
use hpc_launch::{Credentials, JobLauncher, JobStatus, LaunchError, Parameters};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Launch a computational job locally or over SSH", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one job and wait for it to finish.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job parameter as key=value. Repeatable; overrides --param-file.
    #[arg(long = "param", short = 'p')]
    params: Vec<String>,
    /// File with one key=value per line. Blank lines and lines starting with # are ignored.
    #[arg(long)]
    param_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Cmd::Run(args) => run(args).await,
    };
    match result {
        Ok(JobStatus::Processed) => {}
        Ok(status) => {
            eprintln!("hpc-launch: job finished with status {}", status);
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("hpc-launch: {}", err);
            std::process::exit(1);
        }
    }
}

async fn load_params(args: &RunArgs) -> Result<Parameters, LaunchError> {
    let mut params = Parameters::new();
    if let Some(path) = args.param_file.as_ref() {
        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            LaunchError::configuration(format!("Cannot read {}: {}", path.display(), err))
        })?;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = Parameters::parse_pair(line)?;
            params.insert(key, value);
        }
    }
    for raw in &args.params {
        let (key, value) = Parameters::parse_pair(raw)?;
        params.insert(key, value);
    }
    Ok(params)
}

async fn prompt(label: String) -> Result<String, LaunchError> {
    tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        print!("{}", label);
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    })
    .await
    .map_err(|_| LaunchError::internal("Prompt task failed"))?
    .map_err(LaunchError::from)
}

async fn ask_credentials(job: &JobLauncher) -> Result<Option<Credentials>, LaunchError> {
    let Some(form) = job.credential_form() else {
        return Ok(None);
    };
    let username = prompt(format!("Username for {} [{}]: ", form.hostname, form.username)).await?;
    let username = if username.trim().is_empty() {
        form.username.clone()
    } else {
        username.trim().to_string()
    };
    let password = match std::env::var("HPC_LAUNCH_PASSWORD") {
        Ok(password) => password,
        Err(_) => prompt(format!("Password for {}@{}: ", username, form.hostname)).await?,
    };
    Ok(Some(Credentials::new(username, password)))
}

async fn run(args: RunArgs) -> Result<JobStatus, LaunchError> {
    let params = load_params(&args).await?;
    let logger = Logger::new("hpc-launch");
    let job = JobLauncher::new(&logger);

    match job.execute(params) {
        JobStatus::InfoError => return Ok(JobStatus::InfoError),
        JobStatus::NeedsInfo => {
            let credentials = tokio::select! {
                creds = ask_credentials(&job) => creds?,
                _ = tokio::signal::ctrl_c() => {
                    job.cancel();
                    return Ok(job.join().await);
                }
            };
            if job.submit_form(credentials) == JobStatus::InfoError {
                job.cancel();
                job.join().await;
                return Err(LaunchError::configuration("Credentials were not accepted"));
            }
        }
        _ => {}
    }

    tokio::select! {
        _ = job.wait_terminal() => {}
        _ = tokio::signal::ctrl_c() => {
            logger.info("Interrupted, cancelling job", None);
            job.cancel();
        }
    }
    Ok(job.join().await)
}
