//! Applying and deleting rendered documents, like `kubectl apply -f` and
//! `kubectl delete -f`
//!
//! - Server-Side Apply through the gateway, so re-applying is idempotent
//! - Namespaced kinds without `metadata.namespace` land in the release namespace
//! - `helm.sh/resource-policy: keep` protects an object from deletion
//! - Upgrades prune objects the new manifest no longer carries

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use kubepack_engine::Document;

use crate::error::{KubeError, Result};
use crate::gateway::{ClusterGateway, ResourceMapping, object_name, object_namespace};

/// Annotation to keep a resource on uninstall (Helm-compatible)
pub const RESOURCE_POLICY_ANNOTATION: &str = "helm.sh/resource-policy";
pub const RESOURCE_POLICY_KEEP: &str = "keep";

/// Identity of an object across revisions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub kind: String,
    /// Namespace as written or defaulted; cluster-scoped kinds ignore it
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn of(object: &JsonValue, default_namespace: &str) -> Self {
        let api_version = object
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Self {
            group: kubepack_engine::split_api_version(api_version).0.to_string(),
            kind: object
                .get("kind")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string(),
            namespace: object_namespace(object)
                .unwrap_or(default_namespace)
                .to_string(),
            name: object_name(object).to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Keys of every object in a set of documents
pub fn object_keys<'a>(
    docs: impl IntoIterator<Item = &'a Document>,
    default_namespace: &str,
) -> BTreeSet<ObjectKey> {
    docs.into_iter()
        .flat_map(Document::objects)
        .map(|object| ObjectKey::of(object, default_namespace))
        .collect()
}

/// Whether an object asks to survive deletion
pub fn has_keep_policy(object: &JsonValue) -> bool {
    object
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(RESOURCE_POLICY_ANNOTATION))
        .and_then(JsonValue::as_str)
        .is_some_and(|policy| policy.trim() == RESOURCE_POLICY_KEEP)
}

/// Summary of apply/delete operations
#[derive(Debug, Clone, Default)]
pub struct OperationSummary {
    pub applied: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    /// Objects left alone, with the reason
    pub skipped: Vec<(ObjectKey, String)>,
}

impl OperationSummary {
    pub fn total(&self) -> usize {
        self.applied.len() + self.deleted.len() + self.skipped.len()
    }

    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.applied.is_empty() {
            parts.push(format!("{} applied", self.applied.len()));
        }
        if !self.deleted.is_empty() {
            parts.push(format!("{} deleted", self.deleted.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped", self.skipped.len()));
        }
        if parts.is_empty() {
            "No resources processed".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Applies and deletes documents through a gateway
#[derive(Clone)]
pub struct ResourceManager {
    gateway: Arc<dyn ClusterGateway>,
}

impl ResourceManager {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn ClusterGateway> {
        &self.gateway
    }

    /// Resolve an object's kind and default its namespace
    pub async fn prepare(
        &self,
        object: &JsonValue,
        default_namespace: &str,
    ) -> Result<(ResourceMapping, JsonValue)> {
        let api_version = object
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let kind = object
            .get("kind")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        if kind.is_empty() || object_name(object).is_empty() {
            return Err(KubeError::InvalidManifest(format!(
                "object without kind or metadata.name: {}",
                serde_json::to_string(object).unwrap_or_default()
            )));
        }

        let mapping = self.gateway.resolve_kind(api_version, kind).await?;
        let mut object = object.clone();
        if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
            if mapping.namespaced {
                metadata
                    .entry("namespace")
                    .or_insert_with(|| JsonValue::String(default_namespace.to_string()));
            } else {
                metadata.remove("namespace");
            }
        }
        Ok((mapping, object))
    }

    /// Server-side apply a single object
    pub async fn apply_object(&self, object: &JsonValue, default_namespace: &str) -> Result<JsonValue> {
        let (mapping, object) = self.prepare(object, default_namespace).await?;
        self.gateway.apply(&mapping, &object).await
    }

    /// Apply documents in the order given, stopping at the first failure
    pub async fn apply_documents(
        &self,
        docs: &[&Document],
        default_namespace: &str,
    ) -> Result<OperationSummary> {
        let mut summary = OperationSummary::default();
        for doc in docs {
            for object in doc.objects() {
                let key = ObjectKey::of(object, default_namespace);
                self.apply_object(object, default_namespace).await?;
                tracing::debug!(object = %key, source = %doc.source, "applied");
                summary.applied.push(key);
            }
        }
        Ok(summary)
    }

    /// Delete documents in the order given
    ///
    /// Objects carrying the keep policy and objects whose kind is no longer
    /// served are skipped. Objects already gone count as deleted.
    pub async fn delete_documents(
        &self,
        docs: &[&Document],
        default_namespace: &str,
    ) -> Result<OperationSummary> {
        let mut summary = OperationSummary::default();
        for doc in docs {
            for object in doc.objects() {
                let key = ObjectKey::of(object, default_namespace);
                if has_keep_policy(object) {
                    tracing::info!(object = %key, "keeping resource per resource-policy");
                    summary
                        .skipped
                        .push((key, format!("{RESOURCE_POLICY_ANNOTATION}={RESOURCE_POLICY_KEEP}")));
                    continue;
                }
                let mapping = match self.prepare(object, default_namespace).await {
                    Ok((mapping, _)) => mapping,
                    Err(KubeError::UnknownResource { .. }) => {
                        summary.skipped.push((key, "kind no longer served".to_string()));
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let namespace = mapping.scope(Some(key.namespace.as_str()));
                self.gateway.delete(&mapping, namespace, &key.name).await?;
                tracing::debug!(object = %key, "deleted");
                summary.deleted.push(key);
            }
        }
        Ok(summary)
    }

    /// Delete objects of `previous` that `current` no longer carries
    pub async fn prune(
        &self,
        previous: &[Document],
        current: &[&Document],
        default_namespace: &str,
    ) -> Result<OperationSummary> {
        let keep = object_keys(current.iter().copied(), default_namespace);
        let mut stale: Vec<&Document> = previous
            .iter()
            .filter(|doc| {
                doc.objects()
                    .into_iter()
                    .any(|object| !keep.contains(&ObjectKey::of(object, default_namespace)))
            })
            .collect();
        // uninstall order for what goes away
        stale.reverse();
        self.delete_documents(&stale, default_namespace).await
    }
}
