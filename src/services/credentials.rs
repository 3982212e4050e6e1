use crate::errors::LaunchError;
use crate::utils::user_paths::local_username;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Username and password for one remote job. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Login form offered while a remote job waits for credentials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialForm {
    pub hostname: String,
    pub username: String,
}

impl CredentialForm {
    pub fn for_host(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            username: local_username(),
        }
    }

    pub fn submit(&self, password: impl Into<String>) -> Credentials {
        Credentials::new(self.username.clone(), password)
    }
}

/// One-shot hand-off of credentials from the caller to the job worker.
pub struct CredentialSlot {
    sender: Mutex<Option<oneshot::Sender<Credentials>>>,
}

pub struct CredentialWaiter {
    rx: oneshot::Receiver<Credentials>,
}

impl CredentialSlot {
    pub fn open() -> (Self, CredentialWaiter) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            CredentialWaiter { rx },
        )
    }

    pub fn closed() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Delivers credentials once. Empty or repeated submissions are rejected
    /// and leave the slot as it was.
    pub fn submit(&self, credentials: Option<Credentials>) -> Result<(), LaunchError> {
        let credentials = credentials
            .ok_or_else(|| LaunchError::configuration("No credentials were supplied"))?;
        if credentials.username.trim().is_empty() {
            return Err(LaunchError::configuration("Username must not be empty"));
        }
        let mut guard = self
            .sender
            .lock()
            .map_err(|_| LaunchError::internal("Credential slot lock poisoned"))?;
        let sender = guard.take().ok_or_else(|| {
            LaunchError::configuration("Credentials were already submitted for this job")
        })?;
        sender
            .send(credentials)
            .map_err(|_| LaunchError::cancelled("Job stopped before credentials arrived"))
    }
}

impl CredentialWaiter {
    pub async fn wait(self, cancel: &CancellationToken) -> Result<Credentials, LaunchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LaunchError::cancelled("Cancelled while waiting for credentials")),
            received = self.rx => received
                .map_err(|_| LaunchError::cancelled("Credential slot closed")),
        }
    }
}
