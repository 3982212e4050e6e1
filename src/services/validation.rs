use crate::errors::LaunchError;
use crate::services::params::Parameters;

#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    /// Collects every absent or blank key from `required`.
    pub fn missing_keys(&self, params: &Parameters, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| params.get_non_empty(key).is_none())
            .map(|key| key.to_string())
            .collect()
    }

    pub fn ensure_present(&self, params: &Parameters, required: &[&str]) -> Result<(), LaunchError> {
        let missing = self.missing_keys(params, required);
        if missing.is_empty() {
            return Ok(());
        }
        Err(
            LaunchError::configuration(format!(
                "Missing required job parameters: {}",
                missing.join(", ")
            ))
            .with_hint("Provide every required key in the job dictionary.")
            .with_details(serde_json::json!({ "missing": missing })),
        )
    }

    /// Process/thread count: absent means 1, values below 1 clamp to 1.
    pub fn ensure_count(&self, params: &Parameters, key: &str) -> Result<u32, LaunchError> {
        let Some(raw) = params.get_non_empty(key) else {
            return Ok(1);
        };
        let parsed = raw.parse::<i64>().map_err(|_| {
            LaunchError::configuration(format!("{} must be an integer, got '{}'", key, raw))
        })?;
        Ok(parsed.clamp(1, u32::MAX as i64) as u32)
    }

    pub fn ensure_port(&self, params: &Parameters, key: &str, fallback: u16) -> Result<u16, LaunchError> {
        let Some(raw) = params.get_non_empty(key) else {
            return Ok(fallback);
        };
        match raw.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(LaunchError::configuration(format!(
                "{} must be an integer between 1 and 65535, got '{}'",
                key, raw
            ))),
        }
    }

    pub fn ensure_byte_size(&self, params: &Parameters, key: &str, fallback: u64) -> Result<u64, LaunchError> {
        let Some(raw) = params.get_non_empty(key) else {
            return Ok(fallback);
        };
        match raw.parse::<u64>() {
            Ok(size) if size > 0 => Ok(size),
            _ => Err(LaunchError::configuration(format!(
                "{} must be a positive byte count, got '{}'",
                key, raw
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_present_lists_all_missing_keys() {
        let params = Parameters::new().with("executable", "ls").with("hostname", " ");
        let err = Validation::new()
            .ensure_present(&params, &["executable", "hostname", "stdOutFileName"])
            .unwrap_err();
        let missing = err.details.unwrap()["missing"].clone();
        assert_eq!(missing, serde_json::json!(["hostname", "stdOutFileName"]));
    }

    #[test]
    fn counts_default_and_clamp() {
        let v = Validation::new();
        let params = Parameters::new().with("numProcs", "0").with("numTBBThreads", "8");
        assert_eq!(v.ensure_count(&params, "numProcs").unwrap(), 1);
        assert_eq!(v.ensure_count(&params, "numTBBThreads").unwrap(), 8);
        assert_eq!(v.ensure_count(&params, "numOMPThreads").unwrap(), 1);
        let bad = Parameters::new().with("numProcs", "four");
        assert!(v.ensure_count(&bad, "numProcs").is_err());
    }

    #[test]
    fn port_rejects_zero_and_garbage() {
        let v = Validation::new();
        assert_eq!(v.ensure_port(&Parameters::new(), "port", 22).unwrap(), 22);
        assert!(v.ensure_port(&Parameters::new().with("port", "0"), "port", 22).is_err());
        assert!(v.ensure_port(&Parameters::new().with("port", "ssh"), "port", 22).is_err());
    }
}
