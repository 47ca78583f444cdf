//! Helm release record
//!
//! The JSON form of [`Release`] is the one Helm stores in its release driver,
//! so releases written here stay readable by `helm list`/`helm status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::chart::Chart;

/// A deployed revision of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,

    #[serde(default)]
    pub info: ReleaseInfo,

    #[serde(default)]
    pub chart: Chart,

    /// User-supplied values (before coalescing with chart defaults)
    #[serde(default)]
    pub config: JsonValue,

    /// Rendered non-hook manifests
    #[serde(default)]
    pub manifest: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookRecord>,

    /// Revision counter
    pub version: u32,

    pub namespace: String,
}

impl Release {
    /// Name of the storage object holding this revision
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.version)
    }
}

/// Storage object name for a release revision (`sh.helm.release.v1.<name>.v<N>`)
pub fn storage_key(name: &str, version: u32) -> String {
    format!("sh.helm.release.v1.{}.v{}", name, version)
}

/// Release bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default, with = "helm_time")]
    pub first_deployed: Option<DateTime<Utc>>,

    #[serde(default, with = "helm_time")]
    pub last_deployed: Option<DateTime<Utc>>,

    #[serde(default, with = "helm_time")]
    pub deleted: Option<DateTime<Utc>>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: ReleaseStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

/// Release status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    /// Whether an operation is in flight
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(JsonValue::String(s.to_string()))
            .map_err(|_| format!("unknown release status '{s}'"))
    }
}

/// Lifecycle events a hook can attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreDelete,
    PostDelete,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    Test,
}

impl HookEvent {
    /// Parse an annotation value; `test-success` is Helm 2's name for `test`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "pre-install" => Some(Self::PreInstall),
            "post-install" => Some(Self::PostInstall),
            "pre-delete" => Some(Self::PreDelete),
            "post-delete" => Some(Self::PostDelete),
            "pre-upgrade" => Some(Self::PreUpgrade),
            "post-upgrade" => Some(Self::PostUpgrade),
            "pre-rollback" => Some(Self::PreRollback),
            "post-rollback" => Some(Self::PostRollback),
            "test" | "test-success" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreDelete => "pre-delete",
            Self::PostDelete => "post-delete",
            Self::PreUpgrade => "pre-upgrade",
            Self::PostUpgrade => "post-upgrade",
            Self::PreRollback => "pre-rollback",
            Self::PostRollback => "post-rollback",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a hook resource is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookDeletePolicy {
    HookSucceeded,
    HookFailed,
    BeforeHookCreation,
}

impl HookDeletePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "hook-succeeded" => Some(Self::HookSucceeded),
            "hook-failed" => Some(Self::HookFailed),
            "before-hook-creation" => Some(Self::BeforeHookCreation),
            _ => None,
        }
    }
}

/// A hook as stored in the release record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    pub name: String,
    pub kind: String,

    /// Template path, e.g. `stash/templates/cleaner.yaml`
    pub path: String,

    pub manifest: String,

    #[serde(default)]
    pub events: Vec<HookEvent>,

    #[serde(default)]
    pub last_run: HookExecution,

    #[serde(default)]
    pub weight: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_policies: Vec<HookDeletePolicy>,
}

/// Outcome of the last hook run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookExecution {
    #[serde(default, with = "helm_time")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, with = "helm_time")]
    pub completed_at: Option<DateTime<Utc>>,

    /// `Running`, `Succeeded` or `Failed`; empty when never run
    #[serde(default)]
    pub phase: String,
}

/// Helm serializes the zero time as `""`
mod helm_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some("") | Some("0001-01-01T00:00:00Z") => Ok(None),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ReleaseStatus::PendingInstall).unwrap(),
            "pending-install"
        );
        assert_eq!("superseded".parse::<ReleaseStatus>().unwrap(), ReleaseStatus::Superseded);
        assert!("bogus".parse::<ReleaseStatus>().is_err());
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("cert-manager", 3), "sh.helm.release.v1.cert-manager.v3");
    }

    #[test]
    fn test_decode_helm_release_json() {
        let json = r#"{
            "name": "stash",
            "info": {
                "first_deployed": "2020-05-01T10:00:00Z",
                "last_deployed": "2020-05-01T10:00:00Z",
                "deleted": "",
                "description": "Install complete",
                "status": "deployed"
            },
            "chart": {
                "metadata": {"apiVersion": "v2", "name": "stash", "version": "v0.9.0"},
                "templates": [],
                "values": {"replicas": 1},
                "files": []
            },
            "config": {},
            "manifest": "---\n# Source: stash/templates/sa.yaml\n",
            "hooks": [{
                "name": "stash-cleaner",
                "kind": "Job",
                "path": "stash/templates/cleaner.yaml",
                "manifest": "kind: Job",
                "events": ["pre-delete"],
                "last_run": {"started_at": "", "completed_at": "", "phase": ""},
                "weight": 0,
                "delete_policies": ["hook-succeeded"]
            }],
            "version": 1,
            "namespace": "kube-system"
        }"#;

        let release: Release = serde_json::from_str(json).unwrap();

        assert_eq!(release.info.status, ReleaseStatus::Deployed);
        assert!(release.info.deleted.is_none());
        assert!(release.info.first_deployed.is_some());
        assert_eq!(release.hooks[0].events, vec![HookEvent::PreDelete]);
        assert_eq!(release.hooks[0].delete_policies, vec![HookDeletePolicy::HookSucceeded]);
        assert_eq!(release.storage_key(), "sh.helm.release.v1.stash.v1");

        let back = serde_json::to_value(&release).unwrap();
        assert_eq!(back["info"]["deleted"], "");
    }

    #[test]
    fn test_hook_event_parse() {
        assert_eq!(HookEvent::parse(" post-install"), Some(HookEvent::PostInstall));
        assert_eq!(HookEvent::parse("test-success"), Some(HookEvent::Test));
        assert_eq!(HookEvent::parse("crd-install"), None);
    }
}
