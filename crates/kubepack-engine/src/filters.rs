//! Helm-compatible template filters
//!
//! Names follow the Sprig functions that chart authors expect
//! (`toyaml`, `nindent`, `b64enc` ...). Sprig spellings are registered as
//! aliases in [`crate::engine`].

use base64::Engine as _;
use minijinja::{Error, ErrorKind, Value};
use semver::Version;
use sha2::{Digest, Sha256};

use kubepack_core::KubeVersion;

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| invalid(e.to_string()))
}

fn as_text(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None if value.is_none() || value.is_undefined() => String::new(),
        None => value.to_string(),
    }
}

/// `{{ values.resources | toyaml }}`
pub fn toyaml(value: Value) -> Result<String, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(String::new());
    }
    let yaml = serde_yaml::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// `{{ values.config | tojson }}`
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?).map_err(|e| invalid(e.to_string()))
}

pub fn b64encode(value: Value) -> String {
    base64::engine::general_purpose::STANDARD.encode(as_text(&value))
}

pub fn b64decode(value: String) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| invalid(format!("base64 decode error: {e}")))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded value is not UTF-8: {e}")))
}

/// Double-quote a scalar, escaping backslashes and quotes
pub fn quote(value: Value) -> String {
    let text = as_text(&value);
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn squote(value: Value) -> String {
    format!("'{}'", as_text(&value).replace('\'', "''"))
}

/// Prefix every non-empty line with `spaces` spaces
pub fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `indent` preceded by a newline
pub fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

/// Fail rendering when the value is missing or an empty string
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

/// Sprig `empty`: undefined, none, zero-length and `false` are empty
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    if let Some(len) = value.len() {
        return len == 0;
    }
    !value.is_true()
}

pub fn haskey(value: Value, key: String) -> bool {
    value.get_attr(&key).is_ok_and(|v| !v.is_undefined())
}

/// Keys of a mapping, sorted
pub fn keys(value: Value) -> Result<Vec<String>, Error> {
    match to_json(&value)? {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<String> = map.into_iter().map(|(k, _)| k).collect();
            keys.sort();
            Ok(keys)
        }
        _ => Err(invalid("keys expects a mapping")),
    }
}

/// Deep merge; keys already present in `base` win, like Sprig's `merge`
pub fn merge(base: Value, other: Value) -> Result<Value, Error> {
    let mut merged = to_json(&other)?;
    overlay(&mut merged, to_json(&base)?);
    Ok(Value::from_serialize(&merged))
}

fn overlay(target: &mut serde_json::Value, source: serde_json::Value) {
    match (target, source) {
        (serde_json::Value::Object(target), serde_json::Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

/// Hex-encoded SHA-256, used for config checksums in pod annotations
pub fn sha256sum(value: Value) -> String {
    hex::encode(Sha256::digest(as_text(&value).as_bytes()))
}

/// Truncate to at most `length` characters
pub fn trunc(value: Value, length: usize) -> String {
    as_text(&value).chars().take(length).collect()
}

pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(prefix.as_str()).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(suffix.as_str()).unwrap_or(&value).to_string()
}

/// `{{ capabilities.kubeVersion.version | semver_match(">=1.21.0-0") }}`
///
/// Accepts the same constraint syntax as `kubeVersion` in `Chart.yaml`.
pub fn semver_match(version: Value, constraint: String) -> Result<bool, Error> {
    let version = version
        .as_str()
        .ok_or_else(|| invalid("semver_match expects a version string"))?;
    let kube = KubeVersion::parse(version).map_err(|e| invalid(e.to_string()))?;
    kube.satisfies(&constraint).map_err(|e| invalid(e.to_string()))
}

/// Compare two versions; -1, 0 or 1
pub fn semver_compare(left: String, right: String) -> Result<i32, Error> {
    let parse = |v: &str| {
        Version::parse(v.trim_start_matches('v'))
            .map_err(|e| invalid(format!("invalid version '{v}': {e}")))
    };
    Ok(match parse(&left)?.cmp(&parse(&right)?) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}
