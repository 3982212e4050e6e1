pub fn is_truthy(value: impl AsRef<str>) -> bool {
    matches!(
        value.as_ref().trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Reads a job flag, falling back to `default` when the value is absent or blank.
pub fn flag_or(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => is_truthy(text),
        _ => default,
    }
}

pub fn env_positive_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" yes "));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
    }

    #[test]
    fn flag_or_defaults_on_blank() {
        assert!(flag_or(None, true));
        assert!(flag_or(Some("  "), true));
        assert!(!flag_or(Some("false"), true));
        assert!(flag_or(Some("on"), false));
    }
}
