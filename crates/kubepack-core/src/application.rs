//! `app.k8s.io/v1beta1` Application object

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chart::ChartRef;
use crate::release::ReleaseStatus;

pub const APPLICATION_API_VERSION: &str = "app.k8s.io/v1beta1";
pub const APPLICATION_KIND: &str = "Application";

/// Annotation carrying the API version of each component kind, aligned by index
pub const COMPONENT_VERSIONS_ANNOTATION: &str = "helm.sh/component-versions";

/// Link description used for the chart's home page
pub const LINK_WEBSITE: &str = "website";

/// Link description used for chart sources
pub const LINK_SOURCE_REPO: &str = "source-repo";

/// CRD manifest registering the Application kind
pub const APPLICATION_CRD_URL: &str = "https://github.com/kubernetes-sigs/application/raw/master/config/crd/bases/app.k8s.io_applications.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ApplicationMeta,
    pub spec: ApplicationSpec,
}

impl Application {
    pub fn new(name: &str, namespace: &str, spec: ApplicationSpec) -> Self {
        Self {
            api_version: APPLICATION_API_VERSION.to_string(),
            kind: APPLICATION_KIND.to_string(),
            metadata: ApplicationMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
            spec,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub descriptor: Descriptor,

    #[serde(default, rename = "componentKinds")]
    pub component_group_kinds: Vec<GroupKind>,

    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub add_owner_ref: bool,

    #[serde(default)]
    pub assembly_phase: AssemblyPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<ApplicationPackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub app_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<ImageSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<ContactData>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactData {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub description: String,
    pub url: String,
}

/// API group and kind; the core group is the empty string
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.group)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// Where the release came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<ChartRef>,
    pub chart: ChartRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyPhase {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

impl From<ReleaseStatus> for AssemblyPhase {
    fn from(status: ReleaseStatus) -> Self {
        match status {
            ReleaseStatus::Deployed | ReleaseStatus::Uninstalled | ReleaseStatus::Superseded => {
                Self::Succeeded
            }
            ReleaseStatus::Failed => Self::Failed,
            ReleaseStatus::Unknown
            | ReleaseStatus::Uninstalling
            | ReleaseStatus::PendingInstall
            | ReleaseStatus::PendingUpgrade
            | ReleaseStatus::PendingRollback => Self::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_phase_mapping() {
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Deployed), AssemblyPhase::Succeeded);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Superseded), AssemblyPhase::Succeeded);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Uninstalled), AssemblyPhase::Succeeded);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Failed), AssemblyPhase::Failed);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::PendingUpgrade), AssemblyPhase::Pending);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Uninstalling), AssemblyPhase::Pending);
        assert_eq!(AssemblyPhase::from(ReleaseStatus::Unknown), AssemblyPhase::Pending);
    }

    #[test]
    fn test_application_yaml_shape() {
        let app = Application::new(
            "cert-manager",
            "cert-manager",
            ApplicationSpec {
                component_group_kinds: vec![GroupKind::new("apps", "Deployment")],
                ..Default::default()
            },
        );

        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["apiVersion"], "app.k8s.io/v1beta1");
        assert_eq!(value["spec"]["componentKinds"][0]["kind"], "Deployment");
        assert_eq!(value["spec"]["assemblyPhase"], "Pending");
    }
}
