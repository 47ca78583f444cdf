//! Helm repository index (`index.yaml`)

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use kubepack_core::ChartMetadata;

use crate::error::{RepoError, Result};

/// Repository index, as served at `<repo>/index.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Chart versions indexed by chart name
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: None,
            entries: BTreeMap::new(),
        }
    }
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::InvalidIndex {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::InvalidIndex {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    /// All versions of a chart
    pub fn get(&self, name: &str) -> Option<&[ChartVersion]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Highest semver version of a chart
    ///
    /// Versions that do not parse as semver sort below every valid one.
    pub fn get_latest(&self, name: &str) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .max_by(|a, b| compare_versions(&a.metadata.version, &b.metadata.version))
    }

    /// Exact version lookup, tolerating a `v` prefix on either side
    pub fn get_version(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        let wanted = version.trim_start_matches('v');
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.metadata.version.trim_start_matches('v') == wanted)
    }

    /// Resolve a version request; an empty version means the latest
    pub fn resolve(&self, name: &str, version: &str) -> Option<&ChartVersion> {
        if version.is_empty() {
            self.get_latest(name)
        } else {
            self.get_version(name, version)
        }
    }

    pub fn add_entry(&mut self, entry: ChartVersion) {
        self.entries
            .entry(entry.metadata.name.clone())
            .or_default()
            .push(entry);
    }
}

/// One chart version in the index: chart metadata plus download coordinates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    #[serde(flatten)]
    pub metadata: ChartMetadata,

    /// Archive URLs, absolute or relative to the repository URL
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl ChartVersion {
    /// Primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

/// Parse a chart version, accepting the `v` prefix common in chart repositories
pub fn parse_version(version: &str) -> Option<Version> {
    Version::parse(version.trim().trim_start_matches('v')).ok()
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
