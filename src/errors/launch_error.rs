use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchErrorKind {
    Configuration,
    Connection,
    StageExecution,
    Transfer,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchError {
    pub kind: LaunchErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LaunchError {
    pub fn new(kind: LaunchErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::Configuration, "CONFIGURATION", message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::Connection, "CONNECTION", message)
    }

    pub fn stage_execution(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::StageExecution, "STAGE_EXECUTION", message)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::Transfer, "TRANSFER", message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(LaunchErrorKind::Internal, "INTERNAL", message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == LaunchErrorKind::Cancelled
    }

    /// Re-tags an error raised by a lower layer, keeping message and details.
    pub fn into_kind(mut self, kind: LaunchErrorKind) -> Self {
        if self.kind == LaunchErrorKind::Cancelled {
            return self;
        }
        self.kind = kind;
        self.code = match kind {
            LaunchErrorKind::Configuration => "CONFIGURATION",
            LaunchErrorKind::Connection => "CONNECTION",
            LaunchErrorKind::StageExecution => "STAGE_EXECUTION",
            LaunchErrorKind::Transfer => "TRANSFER",
            LaunchErrorKind::Cancelled => "CANCELLED",
            LaunchErrorKind::Internal => "INTERNAL",
        }
        .to_string();
        self
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for LaunchError {}

impl From<std::io::Error> for LaunchError {
    fn from(err: std::io::Error) -> Self {
        LaunchError::internal(err.to_string())
    }
}
