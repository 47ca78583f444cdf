//! Order: a flat, submitted selection of charts

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::bundle::ResourceDefinitions;
use crate::chart::ChartRef;
use crate::error::{CoreError, Result};
use crate::wait::WaitFlags;

pub const ORDER_API_VERSION: &str = "kubepack.com/v1alpha1";
pub const ORDER_KIND: &str = "Order";

/// Helm's limit on release names
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static RELEASE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("release name pattern is valid")
});

/// Check a release name against Helm's rules
pub fn validate_release_name(name: &str) -> Result<()> {
    if name.len() > MAX_RELEASE_NAME_LEN {
        return Err(CoreError::ReleaseNameTooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    if !RELEASE_NAME_RE.is_match(name) {
        return Err(CoreError::InvalidReleaseName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub api_version: String,
    pub kind: String,
    pub metadata: OrderMeta,
    pub spec: OrderSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderMeta {
    pub name: String,
    pub uid: Uuid,
    pub creation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSpec {
    /// Selections in installation order
    pub packages: Vec<ChartSelection>,

    /// Cluster version constraint, checked in addition to each chart's own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
}

impl Order {
    /// Create an order with a fresh UID
    pub fn new(name: impl Into<String>, packages: Vec<ChartSelection>) -> Self {
        Self {
            api_version: ORDER_API_VERSION.to_string(),
            kind: ORDER_KIND.to_string(),
            metadata: OrderMeta {
                name: name.into(),
                uid: Uuid::new_v4(),
                creation_timestamp: Utc::now(),
            },
            spec: OrderSpec {
                packages,
                kube_version: None,
            },
        }
    }

    pub fn uid(&self) -> Uuid {
        self.metadata.uid
    }

    pub fn selections(&self) -> &[ChartSelection] {
        &self.spec.packages
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let order: Order = serde_yaml::from_str(yaml)?;
        if order.kind != ORDER_KIND {
            return Err(CoreError::InvalidPackage {
                message: format!("expected kind {ORDER_KIND}, found {}", order.kind),
            });
        }
        Ok(order)
    }
}

/// One installable unit of an order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSelection {
    /// Chart with its concrete version
    pub chart: ChartRef,

    pub release_name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_patch: Option<json_patch::Patch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDefinitions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_fors: Vec<WaitFlags>,

    /// Bundles enclosing this chart, root first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundle_ancestry: Vec<ChartRef>,
}

impl ChartSelection {
    /// Names of the CRDs this selection owns
    pub fn owned_crds(&self) -> Vec<String> {
        self.resources
            .as_ref()
            .map(|r| r.owned.iter().map(|id| id.crd_name()).collect())
            .unwrap_or_default()
    }

    /// The bundle that listed this chart
    pub fn parent_bundle(&self) -> Option<&ChartRef> {
        self.bundle_ancestry.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ResourceId;
    use crate::wait::GroupResource;
    use std::time::Duration;

    fn cert_manager() -> ChartSelection {
        ChartSelection {
            chart: ChartRef::new("https://charts.jetstack.io", "cert-manager", "v0.13.1"),
            release_name: "cert-manager".to_string(),
            namespace: "cert-manager".to_string(),
            values_patch: Some(
                serde_json::from_value(serde_json::json!([
                    {"op": "replace", "path": "/installCRDs", "value": true}
                ]))
                .unwrap(),
            ),
            resources: Some(ResourceDefinitions {
                owned: vec![ResourceId {
                    group: "cert-manager.io".to_string(),
                    version: "v1alpha2".to_string(),
                    name: "certificates".to_string(),
                    kind: "Certificate".to_string(),
                    scope: Some("Namespaced".to_string()),
                }],
                required: vec![],
            }),
            wait_fors: vec![WaitFlags {
                resource: GroupResource::new("apps", "deployments"),
                all: true,
                timeout: Duration::from_secs(300),
                for_condition: "condition=Available".to_string(),
                ..Default::default()
            }],
            bundle_ancestry: vec![ChartRef::new("https://bundles.kubepack.com", "cert-manager-bundle", "v0.13.1")],
            ..Default::default()
        }
    }

    #[test]
    fn test_order_yaml_round_trip() {
        let mut order = Order::new("cert-manager-bundle", vec![cert_manager()]);
        order.spec.kube_version = Some(">= 1.16.0".to_string());

        let yaml = order.to_yaml().unwrap();
        let back = Order::from_yaml(&yaml).unwrap();

        assert_eq!(back, order);
        assert!(yaml.contains(&order.uid().to_string()));
    }

    #[test]
    fn test_from_yaml_rejects_other_kinds() {
        let mut order = Order::new("x", vec![]);
        order.kind = "Bundle".to_string();
        let yaml = serde_yaml::to_string(&order).unwrap();
        assert!(Order::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_fresh_uids() {
        assert_ne!(Order::new("a", vec![]).uid(), Order::new("a", vec![]).uid());
    }

    #[test]
    fn test_release_name_rules() {
        assert!(validate_release_name("stash-v0.9.0").is_ok());
        assert!(matches!(
            validate_release_name(&"a".repeat(54)),
            Err(CoreError::ReleaseNameTooLong { len: 54, .. })
        ));
        assert!(validate_release_name(&"a".repeat(53)).is_ok());
        assert!(matches!(
            validate_release_name("Stash"),
            Err(CoreError::InvalidReleaseName { .. })
        ));
    }

    #[test]
    fn test_owned_crds() {
        let selection = cert_manager();
        assert_eq!(selection.owned_crds(), vec!["certificates.cert-manager.io"]);
        assert_eq!(selection.parent_bundle().unwrap().name, "cert-manager-bundle");
    }
}
