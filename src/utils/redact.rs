use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
pub const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "passphrase",
        "private_key",
        "secret",
        "token",
        "api_key",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r#"\b(password|passwd|passphrase|token|api[_-]?key|secret)\b\s*([:=])\s*([^\s"'`;]+)"#)
                .expect("inline redaction regex"),
            "$1$2***REDACTED***",
        ),
        (
            Regex::new(r"\b(Bearer)\s+([A-Za-z0-9._~-]{10,})\b").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
    ]
});

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    if normalized.is_empty() {
        return false;
    }
    if SENSITIVE_KEYS.contains(normalized.as_str()) {
        return true;
    }
    normalized.contains("secret") || normalized.contains("password")
}

fn truncate_string(value: &str, max_length: usize) -> String {
    if max_length == usize::MAX || value.len() <= max_length {
        return value.to_string();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

/// Masks inline secrets plus any caller-known secret values (six bytes or longer).
pub fn redact_text(value: &str, max_string: usize, extra_secrets: Option<&[String]>) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    if let Some(values) = extra_secrets {
        for raw in values {
            let needle = raw.trim();
            if needle.len() < 6 {
                continue;
            }
            out = out.replace(needle, INLINE_REDACTION);
        }
    }
    truncate_string(&out, max_string)
}

/// Renders job parameters for log metadata with sensitive values masked.
pub fn redact_pairs<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> Value {
    let mut out = serde_json::Map::new();
    for (key, value) in pairs {
        let rendered = if is_sensitive_key(key) {
            DEFAULT_REDACTION.to_string()
        } else {
            redact_text(value, usize::MAX, None)
        };
        out.insert(key.to_string(), Value::String(rendered));
    }
    Value::Object(out)
}
