//! Field table describing a configuration struct
//!
//! Each config struct lists its fields explicitly instead of being
//! discovered by reflection. The table drives flag registration, env var
//! names and type coercion; serde does the final projection.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Number, Value};

use super::resolved::ConfigError;

/// Keys a schema field may not claim
const RESERVED_KEYS: &[&str] = &["config", "help"];

/// Declared type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    Float,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Float => "float",
        }
    }

    /// Whether a serialized default value can back a field of this kind
    pub(crate) fn accepts_default(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64(),
            Self::Boolean => value.is_boolean(),
            Self::Float => value.is_number(),
        }
    }
}

/// One configuration field.
///
/// `ident` names the struct field and yields the environment variable
/// (`UPPERCASE(ident)`); `key` is the file/flag key and must match the
/// field's serde name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub ident: String,
    pub key: String,
    pub kind: FieldKind,
    pub usage: String,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>, kind: FieldKind) -> Self {
        let key = key.into();
        Self {
            ident: key.clone(),
            key,
            kind,
            usage: String::new(),
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::String)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Integer)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Boolean)
    }

    pub fn float(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Float)
    }

    /// Help text shown in `--help`.
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Struct field identifier when it differs from the lookup key.
    pub fn ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = ident.into();
        self
    }

    /// Environment variable overriding this field
    pub fn env_var(&self) -> String {
        self.ident.to_uppercase()
    }
}

/// A struct loadable by [`ConfigLoader`](super::ConfigLoader).
///
/// ```
/// use ops_toolkit::config::{ConfigSchema, FieldSpec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct ServerConfig {
///     name: String,
///     port: i64,
/// }
///
/// impl ConfigSchema for ServerConfig {
///     fn fields() -> Vec<FieldSpec> {
///         vec![
///             FieldSpec::string("name").usage("service name"),
///             FieldSpec::integer("port").usage("listen port"),
///         ]
///     }
/// }
/// ```
pub trait ConfigSchema: Serialize + DeserializeOwned {
    fn fields() -> Vec<FieldSpec>;
}

/// Reject tables that cannot be turned into a flag set.
pub(crate) fn validate(fields: &[FieldSpec]) -> Result<(), ConfigError> {
    let mut seen_keys = std::collections::HashSet::new();
    let mut seen_envs = std::collections::HashSet::new();

    for field in fields {
        if field.key.is_empty() {
            return Err(ConfigError::schema(&field.ident, "missing lookup key"));
        }
        if field.ident.is_empty() {
            return Err(ConfigError::schema(&field.key, "missing field identifier"));
        }
        if RESERVED_KEYS.contains(&field.key.as_str()) {
            return Err(ConfigError::schema(
                &field.ident,
                format!("lookup key can not be '{}'", field.key),
            ));
        }
        if !seen_keys.insert(field.key.as_str()) {
            return Err(ConfigError::schema(
                &field.ident,
                format!("duplicate lookup key '{}'", field.key),
            ));
        }
        if !seen_envs.insert(field.env_var()) {
            return Err(ConfigError::schema(
                &field.ident,
                format!("duplicate environment variable '{}'", field.env_var()),
            ));
        }
    }

    Ok(())
}

/// Coerce a merged value to the field's declared kind.
///
/// Env and flag values arrive as strings; files may hold integers for float
/// fields. Anything else that does not fit is an error.
pub(crate) fn coerce(field: &FieldSpec, value: &Value) -> Result<Value, ConfigError> {
    let mismatch = || ConfigError::Coerce {
        key: field.key.clone(),
        expected: field.kind.name(),
        value: value.to_string(),
    };

    match field.kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(mismatch()),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => parse_bool(s.trim()).map(Value::Bool).ok_or_else(mismatch),
            Value::Number(n) => n
                .as_i64()
                .map(|i| Value::Bool(i != 0))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
