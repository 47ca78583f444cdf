//! Chart definition and loading
//!
//! A [`Chart`] mirrors Helm's in-memory chart: parsed `Chart.yaml`, default
//! values, raw templates, every other file (including `crds/`), and the
//! subcharts found under `charts/`. Its JSON form matches the `chart` field
//! of a Helm release record.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::archive;
use crate::error::{CoreError, Result};

/// Chart type that can be installed
pub const CHART_TYPE_APPLICATION: &str = "application";

/// Reference to a chart in a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChartRef {
    /// Repository URL
    pub url: String,

    /// Chart name
    pub name: String,

    /// Chart version, empty means "latest in the index"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl ChartRef {
    pub fn new(url: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Same chart, different version
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            url: self.url.clone(),
            name: self.name.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ChartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{} ({})", self.name, self.url)
        } else {
            write!(f, "{}@{} ({})", self.name, self.version, self.url)
        }
    }
}

/// Parsed `Chart.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (v1 or v2)
    #[serde(default)]
    pub api_version: String,

    pub name: String,

    /// Chart version. Kept as a string: repositories publish tags like `v0.13.1`.
    pub version: String,

    /// Kubernetes version constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// `application` or `library`; empty means application
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Maintainer information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Dependency declared in `Chart.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub repository: String,

    /// Dot-separated values path that enables the dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ChartDependency {
    /// Get the effective name (alias if set, otherwise name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Whether the dependency is enabled for the given values
    ///
    /// A missing condition, or a condition path that does not resolve, enables it.
    pub fn is_enabled(&self, values: &JsonValue) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };

        // Helm accepts a comma-separated list; the first resolvable path wins
        for path in condition.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut current = values;
            let mut resolved = true;
            for part in path.split('.') {
                match current.get(part) {
                    Some(v) => current = v,
                    None => {
                        resolved = false;
                        break;
                    }
                }
            }
            if resolved {
                if let JsonValue::Bool(b) = current {
                    return *b;
                }
            }
        }
        true
    }
}

/// A file inside a chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartFile {
    /// Path relative to the chart root, e.g. `templates/deployment.yaml`
    pub name: String,

    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ChartFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// File contents as UTF-8 (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// A loaded chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub metadata: ChartMetadata,

    /// Files under `templates/`
    #[serde(default)]
    pub templates: Vec<ChartFile>,

    /// Default values from `values.yaml`
    #[serde(default = "empty_object")]
    pub values: JsonValue,

    /// Raw `values.schema.json`, if any
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<u8>>,

    /// Every other file, including `crds/`
    #[serde(default)]
    pub files: Vec<ChartFile>,

    /// Subcharts from `charts/`
    #[serde(skip)]
    pub dependencies: Vec<Chart>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl Chart {
    /// Chart name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether the chart can be installed (type is empty or `application`)
    pub fn is_installable(&self) -> bool {
        match self.metadata.chart_type.as_deref() {
            None | Some("") => true,
            Some(t) => t == CHART_TYPE_APPLICATION,
        }
    }

    /// Look up a non-template file by its chart-relative path
    pub fn file(&self, name: &str) -> Option<&ChartFile> {
        self.files.iter().find(|f| f.name == name)
    }

    /// CRD manifests from `crds/`, sorted by path
    pub fn crd_files(&self) -> Vec<&ChartFile> {
        let mut crds: Vec<&ChartFile> = self
            .files
            .iter()
            .filter(|f| f.name.starts_with("crds/"))
            .filter(|f| {
                f.name.ends_with(".yaml") || f.name.ends_with(".yml") || f.name.ends_with(".json")
            })
            .collect();
        crds.sort_by(|a, b| a.name.cmp(&b.name));
        crds
    }

    /// Names of alternative values files shipped with the chart
    pub fn values_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !name.contains('/'))
            .filter(|name| {
                name.starts_with("values") && (name.ends_with(".yaml") || name.ends_with(".yml"))
            })
            .filter(|name| !name.contains("schema"))
            .collect()
    }

    /// Parse a values file from the chart
    ///
    /// `values.yaml` resolves to the chart defaults.
    pub fn values_file(&self, name: &str) -> Result<JsonValue> {
        if name == "values.yaml" {
            return Ok(self.values.clone());
        }
        let file = self.file(name).ok_or_else(|| CoreError::ValuesFileNotFound {
            chart: self.metadata.name.clone(),
            name: name.to_string(),
        })?;
        parse_values(&file.data)
    }

    /// Find a loaded subchart by dependency name or alias
    pub fn subchart(&self, dependency: &ChartDependency) -> Option<&Chart> {
        self.dependencies
            .iter()
            .find(|c| c.metadata.name == dependency.name)
    }

    /// Load a chart from an unpacked directory
    pub fn load_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            files.push((rel, std::fs::read(path)?));
        }

        Self::from_files(files)
    }

    /// Build a chart from `(relative path, contents)` pairs rooted at the chart directory
    pub fn from_files(files: Vec<(String, Vec<u8>)>) -> Result<Self> {
        let mut metadata = None;
        let mut values = empty_object();
        let mut schema = None;
        let mut templates = Vec::new();
        let mut other = Vec::new();
        let mut subchart_files: BTreeMap<String, Vec<(String, Vec<u8>)>> = BTreeMap::new();
        let mut subchart_archives = Vec::new();

        for (name, data) in files {
            match name.as_str() {
                "Chart.yaml" => {
                    let meta: ChartMetadata = serde_yaml::from_slice(&data)?;
                    metadata = Some(meta);
                }
                "values.yaml" => values = parse_values(&data)?,
                "values.schema.json" => schema = Some(data),
                n if n.starts_with("templates/") => templates.push(ChartFile::new(n, data)),
                n if n.starts_with("charts/") => {
                    let rest = &n["charts/".len()..];
                    match rest.split_once('/') {
                        Some((sub, inner)) => subchart_files
                            .entry(sub.to_string())
                            .or_default()
                            .push((inner.to_string(), data)),
                        None if rest.ends_with(".tgz") || rest.ends_with(".tar.gz") => {
                            subchart_archives.push(data)
                        }
                        None => other.push(ChartFile::new(n, data)),
                    }
                }
                n => other.push(ChartFile::new(n, data)),
            }
        }

        let metadata = metadata.ok_or_else(|| CoreError::InvalidChart {
            message: "Chart.yaml is missing".to_string(),
        })?;
        if metadata.name.is_empty() {
            return Err(CoreError::MissingField {
                field: "name".to_string(),
            });
        }
        if metadata.version.is_empty() {
            return Err(CoreError::MissingField {
                field: "version".to_string(),
            });
        }

        let mut dependencies = Vec::new();
        for (_, files) in subchart_files {
            dependencies.push(Self::from_files(files)?);
        }
        for data in subchart_archives {
            dependencies.push(archive::load_archive(&data)?);
        }

        templates.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            metadata,
            templates,
            values,
            schema,
            files: other,
            dependencies,
        })
    }
}

/// Parse YAML values, treating an empty document as an empty map
pub fn parse_values(data: &[u8]) -> Result<JsonValue> {
    let value: JsonValue = serde_yaml::from_slice(data)?;
    Ok(match value {
        JsonValue::Null => empty_object(),
        v => v,
    })
}

/// `[]byte` fields in Helm JSON are base64 strings
mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) if !s.is_empty() => base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
