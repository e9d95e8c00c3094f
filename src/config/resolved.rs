//! Resolved configuration with provenance
//!
//! Captures the final values plus which layer each key came from and the
//! digest of every config file that contributed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "private_key",
    "api_key",
    "credential",
];

/// Configuration layer, ordered by precedence (lowest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Defaults,
    Environment,
    File,
    CommandLine,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub layer: Layer,

    /// File path (None for non-file layers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// SHA-256 digest of raw file bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ConfigSource {
    pub(crate) fn layer(layer: Layer) -> Self {
        Self {
            layer,
            path: None,
            digest: None,
        }
    }

    pub(crate) fn file(path: PathBuf, digest: String) -> Self {
        Self {
            layer: Layer::File,
            path: Some(path),
            digest: Some(digest),
        }
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Final value of every schema field, keyed by lookup key
    pub values: Map<String, Value>,

    /// Highest layer that supplied each key
    pub origins: BTreeMap<String, Layer>,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl ResolvedConfig {
    /// Final value of `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Layer that supplied `key`
    pub fn origin(&self, key: &str) -> Option<Layer> {
        self.origins.get(key).copied()
    }

    /// Config files that were actually read
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().filter_map(|s| s.path.as_deref())
    }

    /// Values with secret-looking keys replaced, plus the redacted keys
    pub fn redacted(&self) -> (Value, Vec<String>) {
        let mut values = self.values.clone();
        let mut redactions = Vec::new();
        for (key, value) in values.iter_mut() {
            if is_secret(key) {
                *value = Value::String("[REDACTED]".to_string());
                redactions.push(key.clone());
            }
        }
        (Value::Object(values), redactions)
    }

    /// Log the redacted values at debug level
    pub fn dump(&self) {
        let (value, redactions) = self.redacted();
        debug!(
            config = %value,
            redacted = redactions.len(),
            files = self.sources.iter().filter(|s| s.path.is_some()).count(),
            "resolved configuration"
        );
    }
}

fn is_secret(key: &str) -> bool {
    let key = key.to_lowercase();
    SECRET_KEYS.iter().any(|s| key.contains(s))
}

/// TOML to JSON; datetimes become their RFC 3339 string, non-finite floats null
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Load and parse a TOML file, returning the top-level table and digest
pub(crate) fn load_toml_file(path: &Path) -> Result<(Map<String, Value>, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: format!("invalid UTF-8: {}", e),
    })?;

    let table: toml::Table = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    match toml_to_json(toml::Value::Table(table)) {
        Value::Object(map) => Ok((map, digest)),
        _ => Ok((Map::new(), digest)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config schema: field {field}: {reason}")]
    Schema { field: String, reason: String },

    #[error("{0}")]
    Cli(#[from] clap::Error),

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("config key {key}: expected {expected}, got {value}")]
    Coerce {
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("failed to unmarshal config: {0}")]
    Unmarshal(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn schema(field: &str, reason: impl Into<String>) -> Self {
        Self::Schema {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn resolved(values: Value) -> ResolvedConfig {
        let Value::Object(values) = values else {
            panic!("expected object");
        };
        ResolvedConfig {
            values,
            origins: BTreeMap::new(),
            sources: vec![ConfigSource::layer(Layer::Defaults)],
        }
    }

    #[test]
    fn test_layer_ordering() {
        assert!(Layer::Defaults < Layer::Environment);
        assert!(Layer::Environment < Layer::File);
        assert!(Layer::File < Layer::CommandLine);
    }

    #[test]
    fn test_typed_getters() {
        let config = resolved(json!({
            "name": "svc",
            "age": 20,
            "ratio": 0.5,
            "verbose": true
        }));

        assert_eq!(config.get_str("name"), Some("svc"));
        assert_eq!(config.get_i64("age"), Some(20));
        assert_eq!(config.get_f64("ratio"), Some(0.5));
        assert_eq!(config.get_bool("verbose"), Some(true));
        assert_eq!(config.get_i64("name"), None);
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn test_redaction() {
        let config = resolved(json!({
            "name": "svc",
            "api_token": "secret123",
            "DB_Password": "hunter2"
        }));

        let (value, mut redactions) = config.redacted();
        redactions.sort();

        assert_eq!(value["name"], "svc");
        assert_eq!(value["api_token"], "[REDACTED]");
        assert_eq!(value["DB_Password"], "[REDACTED]");
        assert_eq!(redactions, vec!["DB_Password", "api_token"]);

        // Stored values are untouched
        assert_eq!(config.get_str("api_token"), Some("secret123"));
    }

    #[test]
    fn test_toml_values_map_to_json() {
        let table: toml::Value = toml::from_str(
            r#"
            name = "svc"
            workers = 4
            ratio = 0.5
            verbose = true
            when = 1979-05-27T07:32:00Z
            "#,
        )
        .unwrap();

        assert_eq!(
            toml_to_json(table),
            json!({
                "name": "svc",
                "workers": 4,
                "ratio": 0.5,
                "verbose": true,
                "when": "1979-05-27T07:32:00Z"
            })
        );
    }

    #[test]
    fn test_load_toml_file_digest() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-file\"").unwrap();
        writeln!(file, "age = 20").unwrap();

        let (table, digest) = load_toml_file(file.path()).unwrap();

        assert_eq!(table["name"], "from-file");
        assert_eq!(table["age"], 20);
        assert_eq!(digest.len(), 64);

        let (_, again) = load_toml_file(file.path()).unwrap();
        assert_eq!(digest, again);
    }

    #[test]
    fn test_load_toml_file_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name = ").unwrap();

        let err = load_toml_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
