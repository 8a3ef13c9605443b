//! Database connection configuration.
//!
//! Loaded from a TOML file and then overridden from the environment:
//!
//! ```toml
//! name = "labs"
//! uri = "mongodb://localhost:27017/labs?authSource=admin"
//! connect_timeout_ms = 10000
//! server_selection_timeout_ms = 10000
//! trace = true
//! ```
//!
//! Environment overrides: `LABSTORE_DB_NAME`, `LABSTORE_DB_URI`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Environment variable overriding [`DatabaseConfig::name`].
pub const ENV_DATABASE_NAME: &str = "LABSTORE_DB_NAME";
/// Environment variable overriding [`DatabaseConfig::uri`].
pub const ENV_DATABASE_URI: &str = "LABSTORE_DB_URI";

/// Settings for the store connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name passed to `setup`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Connection string.
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub server_selection_timeout_ms: u64,
    /// Application name reported to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Log the first document returned by every read.
    #[serde(default = "default_trace")]
    pub trace: bool,
}

fn default_name() -> String {
    "labs".to_string()
}

fn default_uri() -> String {
    "mongodb://localhost:27017/labs?authSource=admin".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_trace() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            uri: default_uri(),
            connect_timeout_ms: default_timeout_ms(),
            server_selection_timeout_ms: default_timeout_ms(),
            app_name: None,
            trace: default_trace(),
        }
    }
}

impl DatabaseConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> DocumentStoreResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DocumentStoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DocumentStoreError::Configuration(format!("Cannot read {}: {e}", path.display()))
        })?;

        Self::from_toml_str(&text)
    }

    /// Defaults, then the file at `path` if it exists, then environment overrides.
    pub fn load(path: Option<&Path>) -> DocumentStoreResult<Self> {
        let config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };

        Ok(config.apply_env(|key| std::env::var(key).ok()))
    }

    /// Applies overrides from `lookup` (normally the process environment).
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(name) = lookup(ENV_DATABASE_NAME).filter(|v| !v.is_empty()) {
            self.name = name;
        }
        if let Some(uri) = lookup(ENV_DATABASE_URI).filter(|v| !v.is_empty()) {
            self.uri = uri;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = DatabaseConfig::from_toml_str("name = \"labs_test\"").unwrap();

        assert_eq!(config.name, "labs_test");
        assert_eq!(config.uri, DatabaseConfig::default().uri);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert!(config.trace);
    }

    #[test]
    fn malformed_toml_is_a_serialization_error() {
        let err = DatabaseConfig::from_toml_str("name = ").unwrap_err();

        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = DatabaseConfig::default().apply_env(|key| match key {
            ENV_DATABASE_URI => Some("mongodb://db1:27017,db2:27017/?replicaSet=rs0".to_string()),
            ENV_DATABASE_NAME => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.uri, "mongodb://db1:27017,db2:27017/?replicaSet=rs0");
        assert_eq!(config.name, "labs");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = DatabaseConfig::load(Some(Path::new("/nonexistent/labstore.toml"))).unwrap();

        assert_eq!(config.connect_timeout_ms, DatabaseConfig::default().connect_timeout_ms);
    }
}
