use crate::errors::LaunchError;
use std::collections::{BTreeMap, HashMap};

/// Flat job dictionary. Keys compare case-insensitively; the spelling of the
/// most recent insert is kept for display.
#[derive(Clone, Debug, Default)]
pub struct Parameters {
    entries: BTreeMap<String, (String, String)>,
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let trimmed = key.trim().to_string();
        self.entries
            .insert(normalize_key(&trimmed), (trimmed, value.into()))
            .map(|(_, old)| old)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&normalize_key(key)).map(|(_, v)| v)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&normalize_key(key))
            .map(|(_, value)| value.as_str())
    }

    /// Value with surrounding whitespace removed, `None` when absent or blank.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_key(key))
    }

    /// Iterates `(original key, value)` in case-insensitive key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses a `key=value` pair as given on the command line.
    pub fn parse_pair(raw: &str) -> Result<(String, String), LaunchError> {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            LaunchError::configuration(format!("Parameter must look like key=value: {}", raw))
        })?;
        if key.trim().is_empty() {
            return Err(LaunchError::configuration(format!(
                "Parameter key must not be empty: {}",
                raw
            )));
        }
        Ok((key.trim().to_string(), value.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Parameters::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

impl From<HashMap<String, String>> for Parameters {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}
