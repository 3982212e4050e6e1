use crate::constants::{limits, network};
use crate::errors::LaunchError;
use crate::services::credentials::Credentials;
use crate::services::handle::{channel_reader, ExecutionHandle, SpawnedProcess};
use crate::services::logger::Logger;
use crate::services::remote::{RemoteEntry, RemoteExecutionService, RemoteSession, RemoteTarget};
use crate::utils::feature_flags::env_positive_u64;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde_json::json;
use ssh2::{OpenFlags, OpenType, Session};
use std::fs;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct SshConnection {
    host: String,
    port: u16,
    username: String,
    password: String,
    ready_timeout_ms: u64,
    keepalive_interval_ms: u64,
}

/// Password-authenticated SSH transport with SFTP file transfer.
#[derive(Clone)]
pub struct SshRemoteService {
    logger: Logger,
    ready_timeout_ms: u64,
    poll_ms: u64,
}

impl SshRemoteService {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
            ready_timeout_ms: env_positive_u64("HPC_LAUNCH_SSH_TIMEOUT_MS")
                .unwrap_or(network::TIMEOUT_SSH_READY_MS),
            poll_ms: env_positive_u64("HPC_LAUNCH_POLL_MS")
                .unwrap_or(network::REMOTE_IDLE_POLL_MS),
        }
    }
}

#[async_trait]
impl RemoteExecutionService for SshRemoteService {
    async fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, LaunchError> {
        let connection = SshConnection {
            host: target.host.clone(),
            port: target.port,
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
            ready_timeout_ms: self.ready_timeout_ms,
            keepalive_interval_ms: network::KEEPALIVE_INTERVAL_MS,
        };
        let conn = connection.clone();
        let (session, fingerprint) = tokio::task::spawn_blocking(move || connect_session(&conn))
            .await
            .map_err(|_| LaunchError::internal("SSH connect task failed"))??;
        self.logger.info(
            "SSH session established",
            Some(&json!({
                "host": connection.host,
                "port": connection.port,
                "host_key_fingerprint_sha256": fingerprint,
            })),
        );
        Ok(Box::new(SshSession {
            session: Arc::new(Mutex::new(session)),
            connection,
            logger: self.logger.clone(),
            poll_ms: self.poll_ms,
        }))
    }
}

struct SshSession {
    session: Arc<Mutex<Session>>,
    connection: SshConnection,
    logger: Logger,
    poll_ms: u64,
}

impl SshSession {
    async fn with_sftp<F, T>(&self, handler: F) -> Result<T, LaunchError>
    where
        F: FnOnce(&ssh2::Sftp) -> Result<T, LaunchError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| LaunchError::internal("SSH session lock poisoned"))?;
            let sftp = guard.sftp().map_err(map_ssh_error)?;
            handler(&sftp)
        })
        .await
        .map_err(|_| LaunchError::internal("SSH SFTP task failed"))?
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn home_dir(&self) -> Result<String, LaunchError> {
        self.with_sftp(|sftp| {
            let path = sftp.realpath(Path::new(".")).map_err(map_ssh_error)?;
            Ok(path.to_string_lossy().to_string())
        })
        .await
    }

    async fn mkdir(&self, path: &str) -> Result<(), LaunchError> {
        let path = path.to_string();
        self.with_sftp(move |sftp| ensure_remote_dir(sftp, &path)).await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), LaunchError> {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        self.with_sftp(move |sftp| {
            let mut local_file = fs::File::open(&local).map_err(|err| {
                LaunchError::transfer(format!("{} must be readable: {}", local.display(), err))
            })?;
            let mut remote_file = sftp
                .open_mode(
                    Path::new(&remote),
                    OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                    0o644,
                    OpenType::File,
                )
                .map_err(map_ssh_error)?;
            io::copy(&mut local_file, &mut remote_file).map_err(|err| {
                LaunchError::transfer(format!("Upload to {} failed: {}", remote, err))
            })?;
            Ok(())
        })
        .await
    }

    async fn start(&self, dir: &str, command: &str) -> Result<SpawnedProcess, LaunchError> {
        let full_command = format!("cd {} && {}", escape_shell_value(dir), command);
        let (handle, reporter) = ExecutionHandle::channel(command);
        let (out_tx, out_rx) = mpsc::channel(limits::STREAM_CHANNEL_DEPTH);
        let (err_tx, err_rx) = mpsc::channel(limits::STREAM_CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let connection = self.connection.clone();
        let poll_ms = self.poll_ms;

        tokio::task::spawn_blocking(move || {
            let kill = reporter.kill_signal();
            let streams = ExecStreams {
                stdout: out_tx,
                stderr: err_tx,
            };
            let code = exec_blocking(&connection, &full_command, &streams, &kill, poll_ms, ready_tx);
            reporter.report(code);
        });

        ready_rx
            .await
            .map_err(|_| LaunchError::internal("SSH exec task ended before start"))??;
        self.logger.debug("Remote command started", Some(&json!({ "dir": dir })));
        Ok(SpawnedProcess {
            handle,
            stdout: channel_reader(out_rx),
            stderr: channel_reader(err_rx),
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, LaunchError> {
        let dir = dir.to_string();
        self.with_sftp(move |sftp| {
            let entries = sftp.readdir(Path::new(&dir)).map_err(map_ssh_error)?;
            Ok(entries
                .into_iter()
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_string_lossy().to_string();
                    if name == "." || name == ".." {
                        return None;
                    }
                    Some(RemoteEntry {
                        name,
                        path: path.to_string_lossy().to_string(),
                        size: stat.size.unwrap_or(0),
                        is_dir: stat.is_dir(),
                    })
                })
                .collect())
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64, LaunchError> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = local.with_extension(format!("tmp-{}", rand::random::<u32>()));
        let tmp_clone = tmp_path.clone();
        let remote_clone = remote.to_string();

        let fetched = self
            .with_sftp(move |sftp| {
                let mut remote_file = sftp.open(Path::new(&remote_clone)).map_err(map_ssh_error)?;
                let mut tmp_file = fs::File::create(&tmp_clone).map_err(|err| {
                    LaunchError::transfer(format!("Failed to create temp file: {}", err))
                })?;
                let bytes = io::copy(&mut remote_file, &mut tmp_file).map_err(|err| {
                    LaunchError::transfer(format!("Download of {} failed: {}", remote_clone, err))
                })?;
                Ok((bytes, sftp.stat(Path::new(&remote_clone)).ok()))
            })
            .await;
        let (bytes, stat) = match fetched {
            Ok(value) => value,
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };

        tokio::fs::rename(&tmp_path, local).await.map_err(|err| {
            LaunchError::transfer(format!("Failed to finalize download: {}", err))
        })?;
        if let Some(stat) = stat {
            if let (Some(atime), Some(mtime)) = (stat.atime, stat.mtime) {
                let atime = filetime::FileTime::from_unix_time(atime as i64, 0);
                let mtime = filetime::FileTime::from_unix_time(mtime as i64, 0);
                let _ = filetime::set_file_times(local, atime, mtime);
            }
        }
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), LaunchError> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let guard = session
                .lock()
                .map_err(|_| LaunchError::internal("SSH session lock poisoned"))?;
            guard
                .disconnect(None, "job finished", None)
                .map_err(map_ssh_error)
        })
        .await
        .map_err(|_| LaunchError::internal("SSH close task failed"))?
    }
}

struct ExecStreams {
    stdout: mpsc::Sender<io::Result<Bytes>>,
    stderr: mpsc::Sender<io::Result<Bytes>>,
}

/// Runs `command` on a dedicated session, forwarding output until EOF or kill.
/// Returns the remote exit status, `-1` when unknown.
fn exec_blocking(
    connection: &SshConnection,
    command: &str,
    streams: &ExecStreams,
    kill: &CancellationToken,
    poll_ms: u64,
    ready: oneshot::Sender<Result<(), LaunchError>>,
) -> i32 {
    let started = connect_session(connection).and_then(|(session, _)| {
        let mut channel = session.channel_session().map_err(map_ssh_error)?;
        channel.exec(command).map_err(map_ssh_error)?;
        Ok((session, channel))
    });
    let (session, mut channel) = match started {
        Ok(pair) => {
            let _ = ready.send(Ok(()));
            pair
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return -1;
        }
    };
    session.set_blocking(false);

    let mut stderr_stream = channel.stderr();
    let mut killed = false;
    loop {
        let mut progressed = false;
        let mut buf = [0u8; limits::STREAM_CHUNK_BYTES];
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                let _ = streams
                    .stdout
                    .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])));
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                let _ = streams.stderr.blocking_send(Err(err));
                break;
            }
        }
        match stderr_stream.read(&mut buf) {
            Ok(n) if n > 0 => {
                let _ = streams
                    .stderr
                    .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])));
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                let _ = streams.stderr.blocking_send(Err(err));
                break;
            }
        }

        if channel.eof() {
            break;
        }
        if kill.is_cancelled() {
            killed = true;
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(poll_ms));
        }
    }

    if killed {
        let _ = channel.close();
        let deadline =
            std::time::Instant::now() + Duration::from_millis(network::TIMEOUT_SSH_CLOSE_GRACE_MS);
        while std::time::Instant::now() < deadline && !channel.eof() {
            std::thread::sleep(Duration::from_millis(poll_ms));
        }
        session.set_blocking(true);
        let _ = session.disconnect(None, "job killed", None);
        return -1;
    }

    session.set_blocking(true);
    let _ = channel.wait_close();
    let code = channel.exit_status().unwrap_or(-1);
    let _ = session.disconnect(None, "job finished", None);
    code
}

fn connect_session(connection: &SshConnection) -> Result<(Session, Option<String>), LaunchError> {
    let addr = (connection.host.as_str(), connection.port)
        .to_socket_addrs()
        .map_err(|err| {
            LaunchError::connection(format!("Cannot resolve {}: {}", connection.host, err))
        })?
        .next()
        .ok_or_else(|| {
            LaunchError::connection(format!("No address found for {}", connection.host))
        })?;
    let timeout = Duration::from_millis(connection.ready_timeout_ms);
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|err| LaunchError::connection(format!("Failed to connect SSH: {}", err)))?;
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session =
        Session::new().map_err(|_| LaunchError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(map_ssh_error)?;
    let observed = fingerprint_host_key_sha256(&session);

    session
        .userauth_password(&connection.username, &connection.password)
        .map_err(|err| {
            LaunchError::connection(format!(
                "SSH authentication failed for {}: {}",
                connection.username,
                map_ssh_error(err)
            ))
        })?;
    if !session.authenticated() {
        return Err(LaunchError::connection("SSH authentication failed"));
    }
    let interval = std::cmp::max(1, (connection.keepalive_interval_ms / 1000) as u32);
    session.set_keepalive(true, interval);

    Ok((session, observed))
}

fn fingerprint_host_key_sha256(session: &Session) -> Option<String> {
    let hash = session.host_key_hash(ssh2::HashType::Sha256)?;
    let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(hash);
    Some(format!("SHA256:{}", encoded))
}

fn escape_shell_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn map_ssh_error(err: ssh2::Error) -> LaunchError {
    let io_err: io::Error = err.into();
    match io_err.kind() {
        io::ErrorKind::TimedOut => LaunchError::connection("SSH operation timed out"),
        _ => LaunchError::internal(format!("SSH error: {}", io_err)),
    }
}

/// Creates `remote_path` and every missing ancestor.
fn ensure_remote_dir(sftp: &ssh2::Sftp, remote_path: &str) -> Result<(), LaunchError> {
    let mut current = PathBuf::new();
    for part in Path::new(remote_path).components() {
        current.push(part);
        if matches!(part, Component::RootDir) || sftp.stat(&current).is_ok() {
            continue;
        }
        sftp.mkdir(&current, 0o755).map_err(|err| {
            LaunchError::transfer(format!(
                "Failed to create remote directory {}: {}",
                current.display(),
                map_ssh_error(err)
            ))
        })?;
    }
    Ok(())
}
