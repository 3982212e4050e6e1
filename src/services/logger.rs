use crate::utils::redact::redact_text;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn from_env() -> Self {
        let raw = std::env::var("HPC_LAUNCH_LOG_LEVEL")
            .or_else(|_| std::env::var("LOG_LEVEL"))
            .unwrap_or_else(|_| "info".to_string());
        Self::parse(&raw).unwrap_or(LogLevel::Info)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Debug => 3,
        }
    }

    fn allows(self, other: LogLevel) -> bool {
        other.rank() <= self.rank()
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    error: u64,
    warn: u64,
    info: u64,
    debug: u64,
}

#[derive(Clone)]
pub struct Logger {
    context: String,
    level: LogLevel,
    counters: Arc<Mutex<Counters>>,
    secrets: Arc<Vec<String>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("context", &self.context)
            .field("level", &self.level)
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl Logger {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            level: LogLevel::from_env(),
            counters: Arc::new(Mutex::new(Counters::default())),
            secrets: Arc::new(Vec::new()),
        }
    }

    pub fn child(&self, suffix: &str) -> Self {
        let context = if suffix.is_empty() {
            self.context.clone()
        } else {
            format!("{}:{}", self.context, suffix)
        };
        Self {
            context,
            level: self.level,
            counters: self.counters.clone(),
            secrets: self.secrets.clone(),
        }
    }

    /// Logger that masks `secret` in every message and metadata line.
    pub fn with_secret(&self, secret: &str) -> Self {
        let mut secrets = (*self.secrets).clone();
        secrets.push(secret.to_string());
        Self {
            secrets: Arc::new(secrets),
            ..self.clone()
        }
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn log(&self, level: LogLevel, message: &str, meta: Option<&serde_json::Value>) {
        if !self.level.allows(level) {
            return;
        }
        if let Ok(mut counters) = self.counters.lock() {
            match level {
                LogLevel::Error => counters.error += 1,
                LogLevel::Warn => counters.warn += 1,
                LogLevel::Info => counters.info += 1,
                LogLevel::Debug => counters.debug += 1,
            }
        }
        let timestamp = chrono::Utc::now().to_rfc3339();
        let meta_suffix = meta
            .and_then(|m| if m.is_null() { None } else { Some(m) })
            .map(|m| format!(" {}", m))
            .unwrap_or_default();
        let line = format!("{}{}", message, meta_suffix);
        eprintln!(
            "[{}] {} [{}] {}",
            timestamp,
            level.label(),
            self.context,
            redact_text(&line, usize::MAX, Some(self.secrets.as_slice()))
        );
    }

    pub fn error(&self, message: &str, meta: Option<&serde_json::Value>) {
        self.log(LogLevel::Error, message, meta);
    }

    pub fn warn(&self, message: &str, meta: Option<&serde_json::Value>) {
        self.log(LogLevel::Warn, message, meta);
    }

    pub fn info(&self, message: &str, meta: Option<&serde_json::Value>) {
        self.log(LogLevel::Info, message, meta);
    }

    pub fn debug(&self, message: &str, meta: Option<&serde_json::Value>) {
        self.log(LogLevel::Debug, message, meta);
    }

    pub fn stats(&self) -> serde_json::Value {
        let counters = self.counters.lock().unwrap_or_else(|err| err.into_inner());
        serde_json::json!({
            "level": format!("{:?}", self.level).to_lowercase(),
            "context": self.context,
            "error": counters.error,
            "warn": counters.warn,
            "info": counters.info,
            "debug": counters.debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_shares_counters_and_extends_context() {
        let mut root = Logger::new("hpc-launch");
        root.set_level(LogLevel::Debug);
        let child = root.child("job");
        assert_eq!(child.context(), "hpc-launch:job");
        child.warn("careful", None);
        root.info("hello", None);
        let stats = root.stats();
        assert_eq!(stats["warn"], 1);
        assert_eq!(stats["info"], 1);
    }

    #[test]
    fn level_filter_drops_verbose_messages() {
        let mut logger = Logger::new("quiet");
        logger.set_level(LogLevel::Error);
        logger.debug("ignored", None);
        logger.info("ignored", None);
        assert_eq!(logger.stats()["debug"], 0);
        assert_eq!(logger.stats()["info"], 0);
    }

    #[test]
    fn secret_logger_keeps_shared_counters() {
        let root = Logger::new("hpc-launch");
        let masked = root.with_secret("hunter22");
        assert_eq!(masked.context(), root.context());
        masked.error("login failed for hunter22", None);
        assert_eq!(root.stats()["error"], 1);
        assert_eq!(masked.secrets.len(), 1);
        assert!(root.secrets.is_empty());
    }

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
    }
}
