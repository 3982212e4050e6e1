use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// Handle over a running local or remote process.
#[derive(Clone, Debug)]
pub struct ExecutionHandle {
    label: String,
    exit: watch::Receiver<Option<i32>>,
    kill: CancellationToken,
}

/// Producer side of an [`ExecutionHandle`], held by whatever drives the process.
pub struct ExitReporter {
    tx: watch::Sender<Option<i32>>,
    kill: CancellationToken,
}

impl ExecutionHandle {
    pub fn channel(label: impl Into<String>) -> (ExecutionHandle, ExitReporter) {
        let (tx, rx) = watch::channel(None);
        let kill = CancellationToken::new();
        (
            ExecutionHandle {
                label: label.into(),
                exit: rx,
                kill: kill.clone(),
            },
            ExitReporter { tx, kill },
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_code().is_none()
    }

    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Resolves with the exit code. A reporter dropped without an exit code
    /// counts as `-1`.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.exit.clone();
        let reported = rx.wait_for(Option::is_some).await.map(|code| *code);
        match reported {
            Ok(code) => code.unwrap_or(-1),
            Err(_) => self.exit_code().unwrap_or(-1),
        }
    }
}

impl ExitReporter {
    pub fn report(&self, code: i32) {
        self.tx.send_replace(Some(code));
    }

    pub fn kill_signal(&self) -> CancellationToken {
        self.kill.clone()
    }
}

pub struct SpawnedProcess {
    pub handle: ExecutionHandle,
    pub stdout: BoxReader,
    pub stderr: BoxReader,
}

/// Wraps a chunk channel as an async reader. The reader ends when every
/// sender is dropped.
pub fn channel_reader(rx: mpsc::Receiver<io::Result<Bytes>>) -> BoxReader {
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Box::pin(tokio_util::io::StreamReader::new(Box::pin(stream)))
}

/// Slot for the handle currently executing, so `cancel()` can reach it.
#[derive(Clone, Default)]
pub struct ActiveHandle {
    inner: Arc<Mutex<Option<ExecutionHandle>>>,
}

impl ActiveHandle {
    pub fn set(&self, handle: ExecutionHandle) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(handle);
        }
    }

    pub fn current(&self) -> Option<ExecutionHandle> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    /// Kills the current handle if it is still running and returns its label.
    pub fn kill(&self) -> Option<String> {
        let handle = self.current().filter(ExecutionHandle::is_running)?;
        handle.kill();
        Some(handle.label().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn wait_returns_reported_code() {
        let (handle, reporter) = ExecutionHandle::channel("stage");
        assert!(handle.is_running());
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        reporter.report(3);
        assert_eq!(waiter.await.unwrap(), 3);
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn dropped_reporter_counts_as_failure() {
        let (handle, reporter) = ExecutionHandle::channel("stage");
        drop(reporter);
        assert_eq!(handle.wait().await, -1);
    }

    #[tokio::test]
    async fn kill_reaches_reporter() {
        let (handle, reporter) = ExecutionHandle::channel("make all");
        let active = ActiveHandle::default();
        assert_eq!(active.kill(), None);
        active.set(handle);
        assert_eq!(active.kill().as_deref(), Some("make all"));
        assert!(reporter.kill_signal().is_cancelled());
        reporter.report(-1);
        assert_eq!(active.kill(), None);
    }

    #[tokio::test]
    async fn channel_reader_concatenates_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"hel"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"lo"))).await.unwrap();
        drop(tx);
        let mut reader = channel_reader(rx);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");
    }
}
