//! Template functions (global functions available in directives)
//!
//! `lookup` is not here: it needs the caller's identity and is bound per request in
//! [`crate::engine`].

use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// Fail with a custom error message
///
/// Usage: {{ fail("team label is required") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, message))
}

/// Create a dict from key-value pairs
///
/// Usage: {{ dict("team", metadata.labels.team, "tier", "web") }}
pub fn dict(args: Vec<Value>) -> Result<Value, Error> {
    if !args.len().is_multiple_of(2) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = serde_json::Map::new();

    for chunk in args.chunks(2) {
        let key = chunk[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        let value: serde_json::Value = serde_json::to_value(&chunk[1])
            .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
        map.insert(key.to_string(), value);
    }

    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

/// Usage: {{ list("a", "b", "c") }}
pub fn list(args: Vec<Value>) -> Value {
    Value::from(args)
}

/// Get a value with a default if undefined
///
/// Usage: {{ get(metadata.labels, "team", "platform") }}
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// Deep get with path and default value
///
/// Usage: {{ dig(object, "spec", "template", "metadata", "labels", {}) }}
/// Equivalent to object.spec.template.metadata.labels with fallback to the last
/// argument if any key is missing. Integer keys index into lists.
pub fn dig(dict: Value, keys_and_default: Rest<Value>) -> Result<Value, Error> {
    let args: &[Value] = &keys_and_default;

    let Some((default, keys)) = args.split_last() else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dig requires at least one key and a default value",
        ));
    };

    let mut current = dict;
    for key in keys {
        let next = match (key.as_str(), key.as_i64()) {
            (Some(k), _) => current.get_attr(k),
            (None, Some(idx)) => current.get_item(&Value::from(idx)),
            (None, None) => return Ok(default.clone()),
        };
        match next {
            Ok(v) if !v.is_undefined() && !v.is_none() => current = v,
            _ => return Ok(default.clone()),
        }
    }

    Ok(current)
}

/// Return first non-empty value
///
/// Usage: {{ coalesce(metadata.labels.team, metadata.namespace, "default") }}
pub fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && !arg.as_str().is_some_and(str::is_empty)
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Ternary operator
///
/// Usage: {{ ternary("ha", "single", spec.replicas > 1) }}
pub fn ternary(true_val: Value, false_val: Value, condition: Value) -> Value {
    if condition.is_true() { true_val } else { false_val }
}

/// Convert a value to a string representation
///
/// Usage: {{ tostring(spec.replicas) }}
pub fn tostring(value: Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Convert a value to an integer
///
/// Usage: {{ toint(metadata.annotations["example.com/replicas"]) }}
pub fn toint(value: Value) -> Result<i64, Error> {
    if let Some(n) = value.as_i64() {
        Ok(n)
    } else if let Some(s) = value.as_str() {
        s.trim().parse::<i64>().map_err(|_| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert '{}' to int", s),
            )
        })
    } else {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot convert {:?} to int", value),
        ))
    }
}

/// Get current timestamp (RFC 3339, UTC)
///
/// Usage: {{ now() }}
pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Printf-style formatting
///
/// Usage: {{ printf("%s-%d", metadata.name, 3) }}
///
/// Supports format specifiers: %s, %d, %v, %%
pub fn printf(format: String, args: Vec<Value>) -> Result<String, Error> {
    let mut result = String::with_capacity(format.len() + args.len() * 10);
    let mut chars = format.chars();
    let mut args = args.iter();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }

        let Some(spec) = chars.next() else {
            result.push('%');
            break;
        };
        if spec == '%' {
            result.push('%');
            continue;
        }

        let arg = args.next().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                "not enough arguments for format string",
            )
        })?;

        match (spec, arg.as_i64(), arg.as_str()) {
            ('d', Some(n), _) => result.push_str(&n.to_string()),
            (_, _, Some(s)) => result.push_str(s),
            _ => result.push_str(&arg.to_string()),
        }
    }

    Ok(result)
}
