//! Values handling: deep merge, Helm coalescing, JSON Patch overlays and `--set` flattening

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(match value {
            JsonValue::Null => Self::new(),
            v => Self(v),
        })
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Coalesce these values into chart defaults, the way Helm does
    ///
    /// User values win over defaults, maps merge recursively, and a `null`
    /// user value deletes the default key.
    pub fn coalesce(self, defaults: &JsonValue) -> Values {
        let mut result = defaults.clone();
        coalesce_into(&mut result, &self.0);
        Values(result)
    }

    /// Apply an RFC 6902 JSON Patch in place
    pub fn apply_patch(&mut self, patch: &json_patch::Patch) -> Result<()> {
        json_patch::patch(&mut self.0, patch).map_err(|e| CoreError::Patch {
            message: e.to_string(),
        })
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Values that differ from `defaults`
    ///
    /// Keys whose merged value equals the default are dropped; keys removed
    /// relative to the defaults are reported as `null`.
    pub fn diff(&self, defaults: &JsonValue) -> Values {
        Values(diff_value(&self.0, defaults).unwrap_or_else(|| JsonValue::Object(Default::default())))
    }

    /// Flatten to `(path, scalar)` pairs in Helm's `--set` key syntax
    ///
    /// Nested maps join with `.`, list elements that are maps or lists use
    /// `[i]` indexes, and lists of scalars stay whole.
    pub fn flatten(&self) -> Vec<(String, JsonValue)> {
        let mut out = Vec::new();
        flatten_into(&self.0, String::new(), &mut out);
        out
    }

    /// Render as `helm --set` arguments (`key=value`)
    pub fn to_set_args(&self) -> Vec<String> {
        self.flatten()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, format_set_value(&value)))
            .collect()
    }

    /// Scope values for a subchart
    ///
    /// When rendering a subchart, it should only see:
    /// 1. Values under `<subchart_name>.*` in the parent, as its root values
    /// 2. Global values under `global.*` preserved as-is
    pub fn scope_for_subchart(&self, subchart_name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent_obj) = &self.0 {
            if let Some(global) = parent_obj.get("global") {
                scoped.insert("global".to_string(), global.clone());
            }

            if let Some(JsonValue::Object(subchart_obj)) = parent_obj.get(subchart_name) {
                for (k, v) in subchart_obj {
                    scoped.insert(k.clone(), v.clone());
                }
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Subchart values: its own defaults coalesced with the scoped parent values
    pub fn for_subchart(
        subchart_defaults: &JsonValue,
        parent_values: &Values,
        subchart_name: &str,
    ) -> Values {
        parent_values
            .scope_for_subchart(subchart_name)
            .coalesce(subchart_defaults)
    }
}

impl From<JsonValue> for Values {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn coalesce_into(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_value) => coalesce_into(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), strip_nulls(overlay_value));
                    }
                }
            }
        }
        (base, overlay) => {
            *base = strip_nulls(overlay);
        }
    }
}

fn strip_nulls(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        v => v.clone(),
    }
}

fn diff_value(value: &JsonValue, defaults: &JsonValue) -> Option<JsonValue> {
    match (value, defaults) {
        (JsonValue::Object(map), JsonValue::Object(default_map)) => {
            let mut out = serde_json::Map::new();
            for (key, v) in map {
                match default_map.get(key) {
                    Some(d) => {
                        if let Some(changed) = diff_value(v, d) {
                            out.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
            for key in default_map.keys() {
                if !map.contains_key(key) {
                    out.insert(key.clone(), JsonValue::Null);
                }
            }
            (!out.is_empty()).then_some(JsonValue::Object(out))
        }
        (v, d) if v == d => None,
        (v, _) => Some(v.clone()),
    }
}

fn flatten_into(value: &JsonValue, prefix: String, out: &mut Vec<(String, JsonValue)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, v) in map {
                let key = escape_set_key(key);
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                match v {
                    JsonValue::Object(inner) if inner.is_empty() => out.push((path, v.clone())),
                    _ => flatten_into(v, path, out),
                }
            }
        }
        JsonValue::Array(items) if items.iter().any(|i| i.is_object() || i.is_array()) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, format!("{prefix}[{i}]"), out);
            }
        }
        v => {
            if !prefix.is_empty() {
                out.push((prefix, v.clone()));
            }
        }
    }
}

fn escape_set_key(key: &str) -> String {
    key.replace('.', "\\.")
}

fn format_set_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::String(s) => escape_set_value(s),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_set_value).collect();
            format!("{{{}}}", parts.join(","))
        }
        JsonValue::Object(map) if map.is_empty() => "{}".to_string(),
        v => v.to_string(),
    }
}

fn escape_set_value(s: &str) -> String {
    s.replace('\\', "\\\\").replace(',', "\\,")
}

/// Set a nested value by path
fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        if remaining.is_empty() {
            map.insert(key.to_string(), new_value);
        } else {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            set_nested(entry, remaining, new_value);
        }
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}
