//! Cluster access
//!
//! Everything the realizer, the auditor and the release drivers need from a
//! cluster goes through [`ClusterGateway`]. Objects travel as JSON so that
//! charts can carry any kind, including ones defined by CRDs installed a
//! step earlier.
//!
//! - [`KubeGateway`]: kube-rs client with cached discovery
//! - [`MockGateway`]: in-memory cluster for tests

mod client;
mod mock;

pub use client::KubeGateway;
pub use mock::MockGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kubepack_core::{GroupResource, KubeVersion};

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "kubepack";

pub const CRD_API_VERSION: &str = "apiextensions.k8s.io/v1";
pub const CRD_KIND: &str = "CustomResourceDefinition";

/// Resolved REST coordinates of a kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name used in URLs
    pub resource: String,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn new(
        group: &str,
        version: &str,
        kind: &str,
        resource: &str,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            resource: resource.to_string(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn namespaces() -> Self {
        Self::new("", "v1", "Namespace", "namespaces", false)
    }

    pub fn secrets() -> Self {
        Self::new("", "v1", "Secret", "secrets", true)
    }

    pub fn crds() -> Self {
        Self::new(
            "apiextensions.k8s.io",
            "v1",
            CRD_KIND,
            "customresourcedefinitions",
            false,
        )
    }

    pub fn applications() -> Self {
        Self::new("app.k8s.io", "v1beta1", "Application", "applications", true)
    }

    /// Namespace to address an object with: `None` for cluster-scoped kinds
    pub fn scope<'a>(&self, namespace: Option<&'a str>) -> Option<&'a str> {
        if self.namespaced { namespace } else { None }
    }
}

impl fmt::Display for ResourceMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Attributes of a SelfSubjectAccessReview
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAttributes {
    /// Empty for cluster-wide checks
    #[serde(default)]
    pub namespace: String,
    pub verb: String,
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl fmt::Display for ResourceAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = if self.group.is_empty() { "core" } else { &self.group };
        write!(f, "{} {}/{}/{}", self.verb, group, self.version, self.resource)?;
        if !self.namespace.is_empty() {
            write!(f, " in {}", self.namespace)?;
        }
        Ok(())
    }
}

/// What the realizer needs from a cluster
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn server_version(&self) -> Result<KubeVersion>;

    /// Map `apiVersion` + `kind` to a resource, like `kubectl apply` does
    async fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping>;

    /// Map a `kubectl wait` resource argument (`deployments.apps`, `pods`)
    async fn resolve_resource(&self, resource: &GroupResource) -> Result<ResourceMapping>;

    async fn get(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>>;

    /// List objects, optionally filtered by a label selector
    async fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<JsonValue>>;

    /// Server-side apply, taking ownership of conflicting fields
    async fn apply(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue>;

    /// Create; fails with [`KubeError::AlreadyExists`] if present
    async fn create(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue>;

    /// Replace; a `metadata.resourceVersion` on `object` must match the stored one
    async fn replace(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue>;

    /// Delete with background propagation; `false` if it was already gone
    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool>;

    /// Submit a SelfSubjectAccessReview
    async fn review_access(&self, attributes: &ResourceAttributes) -> Result<bool>;

    /// Create a namespace unless it exists; `true` if it was created
    async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        let mapping = ResourceMapping::namespaces();
        if self.get(&mapping, None, name).await?.is_some() {
            return Ok(false);
        }
        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name},
        });
        match self.create(&mapping, &namespace).await {
            Ok(_) => Ok(true),
            // lost a race with another writer
            Err(KubeError::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Poll until a CRD reports `Established=True`
    async fn wait_crd_established(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let mapping = ResourceMapping::crds();
        let wait = async {
            loop {
                if let Some(crd) = self.get(&mapping, None, name).await? {
                    if is_established(&crd) {
                        return Ok(());
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| KubeError::Timeout {
                what: format!("CRD {name} to be established"),
                after: timeout,
            })?
    }
}

#[async_trait]
impl<T: ClusterGateway + ?Sized> ClusterGateway for Arc<T> {
    async fn server_version(&self) -> Result<KubeVersion> {
        (**self).server_version().await
    }

    async fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping> {
        (**self).resolve_kind(api_version, kind).await
    }

    async fn resolve_resource(&self, resource: &GroupResource) -> Result<ResourceMapping> {
        (**self).resolve_resource(resource).await
    }

    async fn get(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>> {
        (**self).get(mapping, namespace, name).await
    }

    async fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        (**self).list(mapping, namespace, selector).await
    }

    async fn apply(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        (**self).apply(mapping, object).await
    }

    async fn create(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        (**self).create(mapping, object).await
    }

    async fn replace(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        (**self).replace(mapping, object).await
    }

    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        (**self).delete(mapping, namespace, name).await
    }

    async fn review_access(&self, attributes: &ResourceAttributes) -> Result<bool> {
        (**self).review_access(attributes).await
    }
}

/// Whether a CRD object has `Established=True`
pub fn is_established(crd: &JsonValue) -> bool {
    crd.pointer("/status/conditions")
        .and_then(JsonValue::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(JsonValue::as_str) == Some("Established")
                    && c.get("status").and_then(JsonValue::as_str) == Some("True")
            })
        })
}

/// The resource a CRD object defines
pub fn crd_mapping(crd: &JsonValue) -> Option<ResourceMapping> {
    let spec = crd.get("spec")?;
    let group = spec.get("group")?.as_str()?;
    let kind = spec.pointer("/names/kind")?.as_str()?;
    let plural = spec.pointer("/names/plural")?.as_str()?;
    let version = spec
        .get("versions")
        .and_then(JsonValue::as_array)
        .and_then(|v| v.first())
        .and_then(|v| v.get("name"))
        .and_then(JsonValue::as_str)
        .or_else(|| spec.get("version").and_then(JsonValue::as_str))
        .unwrap_or("v1");
    let namespaced = spec.get("scope").and_then(JsonValue::as_str) != Some("Cluster");
    Some(ResourceMapping::new(group, version, kind, plural, namespaced))
}

/// `metadata.name` of an object
pub fn object_name(object: &JsonValue) -> &str {
    object
        .pointer("/metadata/name")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
}

/// `metadata.namespace` of an object, if set
pub fn object_namespace(object: &JsonValue) -> Option<&str> {
    object
        .pointer("/metadata/namespace")
        .and_then(JsonValue::as_str)
        .filter(|ns| !ns.is_empty())
}

/// `metadata.labels` of an object
pub fn object_labels(object: &JsonValue) -> BTreeMap<String, String> {
    object
        .pointer("/metadata/labels")
        .and_then(JsonValue::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Equality-based label selector (`a=b,c!=d,e,!f`)
///
/// Set-based expressions (`in`, `notin`) are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::NotExists(key.trim().to_string())
            } else if term.contains(' ') || term.contains('(') {
                return Err(KubeError::InvalidManifest(format!(
                    "unsupported label selector '{selector}'"
                )));
            } else {
                Requirement::Exists(term.to_string())
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector() {
        let sel = LabelSelector::parse("owner=helm, name==stash,!deprecated,tier!=db").unwrap();
        assert!(sel.matches(&labels(&[("owner", "helm"), ("name", "stash")])));
        assert!(!sel.matches(&labels(&[("owner", "helm"), ("name", "stash"), ("deprecated", "")])));
        assert!(!sel.matches(&labels(&[("owner", "helm"), ("name", "stash"), ("tier", "db")])));
        assert!(LabelSelector::parse("env in (a,b)").is_err());
        assert!(LabelSelector::parse("").unwrap().matches(&BTreeMap::new()));
    }

    #[test]
    fn test_mapping_api_version() {
        assert_eq!(ResourceMapping::secrets().api_version(), "v1");
        assert_eq!(ResourceMapping::crds().api_version(), "apiextensions.k8s.io/v1");
        assert_eq!(ResourceMapping::crds().to_string(), "customresourcedefinitions.apiextensions.k8s.io");
        assert_eq!(ResourceMapping::crds().scope(Some("default")), None);
    }

    #[test]
    fn test_established() {
        let crd = json!({"status": {"conditions": [
            {"type": "NamesAccepted", "status": "True"},
            {"type": "Established", "status": "True"}
        ]}});
        assert!(is_established(&crd));
        assert!(!is_established(&json!({"status": {}})));
    }

    #[test]
    fn test_attributes_display() {
        let attrs = ResourceAttributes {
            namespace: String::new(),
            verb: "create".to_string(),
            group: "apiextensions.k8s.io".to_string(),
            version: "v1".to_string(),
            resource: "customresourcedefinitions".to_string(),
        };
        assert_eq!(attrs.to_string(), "create apiextensions.k8s.io/v1/customresourcedefinitions");
    }
}
