//! Pre-flight permission audit
//!
//! Renders every selection of an order, buckets the objects by the access
//! review attributes they need, and submits one SelfSubjectAccessReview per
//! bucket. Objects without a namespace are checked against `default`.

use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kubepack_core::{Capabilities, Order, ReleaseCoords};
use kubepack_engine::{Document, RenderRequest, RenderResult, Renderer};
use kubepack_repo::ChartRegistry;

use crate::error::{KubeError, Result};
use crate::gateway::{
    CRD_KIND, ClusterGateway, ResourceAttributes, ResourceMapping, crd_mapping, object_name,
    object_namespace,
};

/// Namespace checked for objects that do not name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Cap on in-flight access reviews
pub const MAX_CONCURRENT_REVIEWS: usize = 32;

/// One distinct attribute tuple and what needs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub attributes: ResourceAttributes,
    /// Objects as `Kind/namespace/name`, sorted
    pub items: Vec<String>,
    pub allowed: bool,
}

/// Result of an audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Sorted by attributes
    pub entries: Vec<AuditEntry>,
    /// Whether every entry is allowed
    pub allowed: bool,
    /// Kinds that could not be resolved and were guessed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AuditReport {
    /// Entries the caller is not allowed
    pub fn denied(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| !e.allowed)
    }
}

/// Checks whether the caller may realize an order
pub struct PermissionAuditor {
    registry: Arc<dyn ChartRegistry>,
    gateway: Arc<dyn ClusterGateway>,
    renderer: Renderer,
}

impl PermissionAuditor {
    pub fn new(registry: Arc<dyn ChartRegistry>, gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            registry,
            gateway,
            renderer: Renderer::new(),
        }
    }

    pub async fn audit(&self, order: &Order, verb: &str) -> Result<AuditReport> {
        let capabilities = Capabilities::new(self.gateway.server_version().await?);

        let mut rendered = Vec::with_capacity(order.selections().len());
        for selection in order.selections() {
            let chart = self.registry.get_chart(&selection.chart).await?;
            let mut request = RenderRequest::for_selection(selection)
                .with_release(ReleaseCoords::for_install(&selection.release_name, &selection.namespace))
                .with_capabilities(capabilities.clone());
            if let Some(constraint) = &order.spec.kube_version {
                request = request.with_kube_version_constraint(constraint);
            }
            rendered.push(self.renderer.render(&chart, &request)?);
        }

        let defined = crds_defined_by(&rendered)?;
        let mut buckets: BTreeMap<ResourceAttributes, BTreeSet<String>> = BTreeMap::new();
        let mut warnings = BTreeSet::new();

        for result in &rendered {
            let crd_names: Vec<String> = result
                .crd_documents()?
                .iter()
                .flat_map(Document::objects)
                .map(|o| object_name(o).to_string())
                .collect();
            if !crd_names.is_empty() {
                let mapping = ResourceMapping::crds();
                buckets
                    .entry(attributes(&mapping, "", verb))
                    .or_default()
                    .extend(crd_names.into_iter().map(|name| format!("{CRD_KIND}//{name}")));
            }

            let documents = result
                .hooks
                .iter()
                .map(|h| &h.document)
                .chain(result.manifests.iter());
            for object in documents.flat_map(Document::objects) {
                let namespace = object_namespace(object).unwrap_or(DEFAULT_NAMESPACE);
                let mapping = self.mapping_for(object, &defined, &mut warnings).await?;
                let namespace = mapping.scope(Some(namespace)).unwrap_or_default();
                buckets
                    .entry(attributes(&mapping, namespace, verb))
                    .or_default()
                    .insert(format!("{}/{namespace}/{}", mapping.kind, object_name(object)));
            }
        }

        let gateway = &self.gateway;
        let mut entries: Vec<AuditEntry> = stream::iter(buckets)
            .map(|(attributes, items)| async move {
                let allowed = gateway.review_access(&attributes).await?;
                Ok::<_, KubeError>(AuditEntry {
                    attributes,
                    items: items.into_iter().collect(),
                    allowed,
                })
            })
            .buffer_unordered(MAX_CONCURRENT_REVIEWS)
            .try_collect::<Vec<_>>()
            .await?;
        entries.sort_by(|a, b| a.attributes.cmp(&b.attributes));

        let allowed = entries.iter().all(|e| e.allowed);
        tracing::info!(
            uid = %order.uid(),
            verb = %verb,
            tuples = entries.len(),
            allowed,
            "permission audit finished"
        );
        Ok(AuditReport {
            entries,
            allowed,
            warnings: warnings.into_iter().collect(),
        })
    }

    /// Discovery first, then CRDs the order itself installs, then a guess
    async fn mapping_for(
        &self,
        object: &JsonValue,
        defined: &[ResourceMapping],
        warnings: &mut BTreeSet<String>,
    ) -> Result<ResourceMapping> {
        let api_version = object
            .get("apiVersion")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let kind = object.get("kind").and_then(JsonValue::as_str).unwrap_or_default();

        match self.gateway.resolve_kind(api_version, kind).await {
            Ok(mapping) => Ok(mapping),
            Err(KubeError::UnknownResource { .. }) => {
                let (group, version) = kubepack_engine::split_api_version(api_version);
                if let Some(mapping) = defined.iter().find(|m| m.group == group && m.kind == kind) {
                    return Ok(ResourceMapping {
                        version: version.to_string(),
                        ..mapping.clone()
                    });
                }
                let resource = naive_plural(kind);
                warnings.insert(format!(
                    "{api_version}/{kind} is not served by the cluster, assuming resource '{resource}'"
                ));
                Ok(ResourceMapping::new(group, version, kind, &resource, true))
            }
            Err(e) => Err(e),
        }
    }
}

fn attributes(mapping: &ResourceMapping, namespace: &str, verb: &str) -> ResourceAttributes {
    ResourceAttributes {
        namespace: namespace.to_string(),
        verb: verb.to_string(),
        group: mapping.group.clone(),
        version: mapping.version.clone(),
        resource: mapping.resource.clone(),
    }
}

/// Kinds registered by CRDs anywhere in the rendered order
fn crds_defined_by(rendered: &[RenderResult]) -> Result<Vec<ResourceMapping>> {
    let mut defined = Vec::new();
    for result in rendered {
        let crds = result.crd_documents()?;
        let templated = result.manifests.iter().filter(|d| d.kind() == CRD_KIND);
        for doc in crds.iter().chain(templated) {
            defined.extend(doc.objects().into_iter().filter_map(crd_mapping));
        }
    }
    Ok(defined)
}

/// English plural of a lowercased kind, the way kubectl guesses
fn naive_plural(kind: &str) -> String {
    let kind = kind.to_lowercase();
    if kind.ends_with('s') || kind.ends_with('x') || kind.ends_with("ch") || kind.ends_with("sh") {
        format!("{kind}es")
    } else if let Some(stem) = kind.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{kind}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{kind}s")
    }
}
