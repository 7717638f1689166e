//! Template filters for patch directives
//!
//! Helm-style helpers for producing YAML or JSON patch bodies, plus `fromyaml` and
//! `fromjson` for reading structured data back out of strings (annotation values,
//! ConfigMap data returned by `lookup`).

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Convert a value to YAML format
///
/// Usage: {{ object.spec | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value =
        serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;

    let yaml = serde_yaml::to_string(&json_value).map_err(|e| invalid(e.to_string()))?;

    // Remove trailing newline and leading "---\n" if present
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Convert a value to JSON format
///
/// Usage: {{ metadata.labels | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    let json_value: serde_json::Value =
        serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;

    serde_json::to_string(&json_value).map_err(|e| invalid(e.to_string()))
}

/// Parse a YAML string into a value
///
/// Usage: {{ (cm.data["config.yaml"] | fromyaml).replicas }}
pub fn fromyaml(value: String) -> Result<Value, Error> {
    let parsed: serde_json::Value = serde_yaml::from_str(&value)
        .map_err(|e| invalid(format!("fromyaml: {}", e)))?;
    Ok(Value::from_serialize(&parsed))
}

/// Parse a JSON string into a value
///
/// Usage: {{ (metadata.annotations["example.com/config"] | fromjson).port }}
pub fn fromjson(value: String) -> Result<Value, Error> {
    let parsed: serde_json::Value =
        serde_json::from_str(&value).map_err(|e| invalid(format!("fromjson: {}", e)))?;
    Ok(Value::from_serialize(&parsed))
}

/// Base64 encode a string
///
/// Usage: {{ metadata.name | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

/// Base64 decode a string
///
/// Usage: {{ secret.data.token | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.as_bytes())
        .map_err(|e| invalid(format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| invalid(format!("UTF-8 decode error: {}", e)))
}

/// Quote a string with double quotes
///
/// Usage: {{ metadata.name | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Quote a string with single quotes
#[must_use]
pub fn squote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("'{}'", s.replace('\'', "''"))
}

/// Indent text with a newline prefix (like Helm's nindent)
///
/// Usage: {{ object.spec.template | toyaml | nindent(4) }}
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Indent every non-empty line
///
/// Usage: {{ content | indent(4) }}
#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Require a value, fail if undefined or empty
///
/// Usage: {{ metadata.labels.team | required("team label is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);

    if missing {
        Err(invalid(
            message.unwrap_or_else(|| "required value is missing".to_string()),
        ))
    } else {
        Ok(value)
    }
}

/// Check if a value is empty
///
/// Usage: {% if lookup("v1", "ConfigMap", ns, "cfg") | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }

    match value.len() {
        Some(len) => len == 0,
        None => value.as_str().is_some_and(str::is_empty),
    }
}

/// Check if a dict has a key
///
/// Usage: {% if metadata.labels | haskey("team") %}
pub fn haskey(value: Value, key: String) -> bool {
    value.get_attr(&key).map(|v| !v.is_undefined()).unwrap_or(false)
}

/// SHA256 hash of a string
///
/// Usage: {{ metadata.name | sha256 | trunc(8) }}
pub fn sha256sum(value: String) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncate a string to a maximum length
///
/// Usage: {{ metadata.name | trunc(63) }}
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

/// Usage: {{ metadata.name | trimprefix("app-") }}
pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

/// Usage: {{ metadata.name | trimsuffix("-canary") }}
pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}
