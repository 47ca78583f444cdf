//! Template rendering context and cluster capabilities

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::error::{CoreError, Result};
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateContext {
    /// Effective values (merged)
    pub values: JsonValue,

    /// Release coordinates
    pub release: ReleaseCoords,

    /// Chart metadata
    pub chart: ChartMetadata,

    /// Cluster capabilities
    pub capabilities: Capabilities,
}

impl TemplateContext {
    /// Create a new template context
    pub fn new(values: Values, release: ReleaseCoords, chart: &ChartMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            chart: chart.clone(),
            capabilities: Capabilities::default(),
        }
    }

    /// Set capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Where a chart is being installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseCoords {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Revision number
    pub revision: u32,

    /// Is this an install operation?
    pub is_install: bool,

    /// Is this an upgrade operation?
    pub is_upgrade: bool,

    /// Service (always "Helm", templates test against it)
    pub service: String,
}

impl ReleaseCoords {
    /// Release coordinates for a new install
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            service: "Helm".to_string(),
        }
    }

    /// Release coordinates for an upgrade
    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: false,
            is_upgrade: true,
            service: "Helm".to_string(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version
    pub kube_version: KubeVersion,

    /// Available API versions
    #[serde(default)]
    pub api_versions: Vec<String>,
}

impl Capabilities {
    pub fn new(kube_version: KubeVersion) -> Self {
        Self {
            kube_version,
            api_versions: Vec::new(),
        }
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    /// `v<major>.<minor>.<patch>`
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self {
            version: "v1.31.0".to_string(),
            major: "1".to_string(),
            minor: "31".to_string(),
        }
    }
}

impl KubeVersion {
    /// Parse a server version such as `v1.28.3-gke.1286000+abc`
    ///
    /// Pre-release and build metadata are stripped, missing minor/patch
    /// components default to zero, and a trailing `+` on the minor
    /// (as reported by some providers) is ignored.
    pub fn parse(version: &str) -> Result<Self> {
        let parsed = Self::semver(version)?;
        Ok(Self {
            version: format!("v{}.{}.{}", parsed.major, parsed.minor, parsed.patch),
            major: parsed.major.to_string(),
            minor: parsed.minor.to_string(),
        })
    }

    /// The version as a plain semver (no pre-release)
    pub fn to_semver(&self) -> Result<Version> {
        Self::semver(&self.version)
    }

    fn semver(version: &str) -> Result<Version> {
        let trimmed = version.trim().trim_start_matches('v');
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        let mut parts = core.split('.').map(|p| p.trim_end_matches('+'));
        let major = parts.next().unwrap_or_default();
        let minor = parts.next().unwrap_or("0");
        let patch = parts.next().unwrap_or("0");

        Ok(Version::parse(&format!("{major}.{minor}.{patch}"))?)
    }

    /// Check the version against a Helm `kubeVersion` constraint
    ///
    /// Accepts the Masterminds syntax used in `Chart.yaml`: comparators
    /// separated by spaces or commas, alternatives separated by `||`.
    pub fn satisfies(&self, constraint: &str) -> Result<bool> {
        let version = self.to_semver()?;
        // Helm appends "-0" so pre-release cluster versions still match
        let version_pre = Version {
            pre: semver::Prerelease::new("0").map_err(CoreError::InvalidVersion)?,
            ..version.clone()
        };

        for alternative in constraint.split("||") {
            let req = parse_constraint(constraint, alternative)?;
            if req.matches(&version) || req.matches(&version_pre) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn parse_constraint(full: &str, alternative: &str) -> Result<VersionReq> {
    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split([' ', ',']).filter(|t| !t.is_empty()) {
        // ">= 1.19" arrives as two tokens
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let mut op = std::mem::take(&mut pending_op);
        let token = token.strip_prefix('v').unwrap_or(token);
        // A bare version is an exact match, not semver's caret default
        if op.is_empty() && token.starts_with(|c: char| c.is_ascii_digit()) {
            op.push('=');
        }
        comparators.push(format!("{op}{token}"));
    }

    if comparators.is_empty() {
        return Ok(VersionReq::STAR);
    }

    VersionReq::parse(&comparators.join(", ")).map_err(|e| CoreError::InvalidConstraint {
        constraint: full.to_string(),
        message: e.to_string(),
    })
}
