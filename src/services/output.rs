use crate::constants::layout;
use crate::errors::LaunchError;
use crate::services::handle::BoxReader;
use crate::services::job_spec::JobSpec;
use crate::utils::fs_atomic::ensure_dir_for_file;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Append-only stdout/stderr files for one job run.
#[derive(Clone)]
pub struct OutputLog {
    stdout: Arc<Mutex<File>>,
    stderr: Arc<Mutex<File>>,
}

async fn open_append(path: &Path) -> Result<File, LaunchError> {
    ensure_dir_for_file(path)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|err| {
            LaunchError::internal(format!("Failed to open {}: {}", path.display(), err))
        })
}

impl OutputLog {
    pub async fn open(stdout_path: &Path, stderr_path: &Path) -> Result<Self, LaunchError> {
        let stdout = open_append(stdout_path).await?;
        let stderr = open_append(stderr_path).await?;
        Ok(Self {
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        })
    }

    fn file(&self, stream: Stream) -> &Arc<Mutex<File>> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    pub async fn append(&self, stream: Stream, bytes: &[u8]) -> Result<(), LaunchError> {
        let mut file = self.file(stream).lock().await;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn append_stdout(&self, text: &str) -> Result<(), LaunchError> {
        self.append(Stream::Stdout, text.as_bytes()).await
    }

    pub async fn append_stderr(&self, text: &str) -> Result<(), LaunchError> {
        self.append(Stream::Stderr, text.as_bytes()).await
    }

    /// Writes the run header to both files.
    pub async fn write_header(&self, header: &OutputHeader) -> Result<(), LaunchError> {
        let rendered = header.render();
        self.append_stdout(&rendered).await?;
        self.append_stderr(&rendered).await
    }

    /// Copies `reader` into the chosen file until EOF.
    pub fn spawn_drain(&self, stream: Stream, mut reader: BoxReader) -> DrainTask {
        let log = self.clone();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; crate::constants::limits::STREAM_CHUNK_BYTES];
            let mut total = 0u64;
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                total += n as u64;
                if log.append(stream, &buf[..n]).await.is_err() {
                    break;
                }
            }
            total
        });
        DrainTask { task }
    }
}

pub struct DrainTask {
    task: JoinHandle<u64>,
}

impl DrainTask {
    /// Waits for the stream to reach EOF and returns the bytes copied. Gives up
    /// after `grace` or on cancellation, since a backgrounded grandchild can
    /// hold the pipe open; returns `None` when the drain was aborted.
    pub async fn settle(mut self, grace: Duration, cancel: &CancellationToken) -> Option<u64> {
        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = tokio::time::timeout(grace, &mut self.task) => joined.ok().and_then(Result::ok),
        };
        if copied.is_none() {
            self.task.abort();
        }
        copied
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

/// Comment block written ahead of every run's output.
#[derive(Clone, Debug)]
pub struct OutputHeader {
    pub launch_host: String,
    pub target_host: String,
    pub command: String,
    pub input_file: Option<String>,
    pub working_dir: String,
}

impl OutputHeader {
    pub fn for_run(spec: &JobSpec, command: &str, working_dir: &str) -> Self {
        Self {
            launch_host: crate::utils::user_paths::local_hostname()
                .unwrap_or_else(|| "localhost".to_string()),
            target_host: spec.hostname.clone(),
            command: command.to_string(),
            input_file: if spec.upload_input {
                spec.input_file.clone()
            } else {
                None
            },
            working_dir: working_dir.to_string(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Job launch date: {}\n",
            chrono::Local::now().format(layout::HEADER_TIMESTAMP_FORMAT)
        ));
        out.push_str(&format!("# Launch host: {}\n", self.launch_host));
        out.push_str(&format!("# Target host: {}\n", self.target_host));
        out.push_str(&format!(
            "# Command Executed: {}\n",
            self.command.replace("\r\n", ";").replace('\n', ";")
        ));
        if let Some(input) = self.input_file.as_deref() {
            out.push_str(&format!("# Input file: {}\n", input));
        }
        out.push_str(&format!("# Working directory: {}\n", self.working_dir));
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lists_fields_in_order() {
        let header = OutputHeader {
            launch_host: "laptop".to_string(),
            target_host: "cluster".to_string(),
            command: "a\nb".to_string(),
            input_file: Some("in.i".to_string()),
            working_dir: "/w".to_string(),
        };
        let text = header.render();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("# Job launch date: "));
        assert_eq!(lines[1], "# Launch host: laptop");
        assert_eq!(lines[2], "# Target host: cluster");
        assert_eq!(lines[3], "# Command Executed: a;b");
        assert_eq!(lines[4], "# Input file: in.i");
        assert_eq!(lines[5], "# Working directory: /w");
        assert!(text.ends_with("\n\n"));
    }

    async fn scratch_log(name: &str) -> OutputLog {
        let dir = std::env::temp_dir().join(format!("{}-{}", name, uuid::Uuid::new_v4()));
        OutputLog::open(&dir.join("out.txt"), &dir.join("err.txt"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn settle_copies_until_eof() {
        let log = scratch_log("hpc-launch-settle-eof").await;
        let (mut writer, reader) = tokio::io::duplex(64);
        let drain = log.spawn_drain(Stream::Stdout, Box::pin(reader));
        writer.write_all(b"done\n").await.unwrap();
        drop(writer);
        let copied = drain
            .settle(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert_eq!(copied, Some(5));
    }

    #[tokio::test]
    async fn settle_gives_up_on_pipe_held_open() {
        let log = scratch_log("hpc-launch-settle-grace").await;
        let (_writer, reader) = tokio::io::duplex(64);
        let drain = log.spawn_drain(Stream::Stdout, Box::pin(reader));
        let copied = drain
            .settle(Duration::from_millis(50), &CancellationToken::new())
            .await;
        assert_eq!(copied, None);
    }

    #[tokio::test]
    async fn settle_stops_on_cancel() {
        let log = scratch_log("hpc-launch-settle-cancel").await;
        let (_writer, reader) = tokio::io::duplex(64);
        let drain = log.spawn_drain(Stream::Stderr, Box::pin(reader));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(drain.settle(Duration::from_secs(30), &cancel).await, None);
    }

    #[test]
    fn header_skips_input_line_without_input() {
        let header = OutputHeader {
            launch_host: "a".to_string(),
            target_host: "b".to_string(),
            command: "c".to_string(),
            input_file: None,
            working_dir: "/w".to_string(),
        };
        assert!(!header.render().contains("# Input file"));
    }
}
