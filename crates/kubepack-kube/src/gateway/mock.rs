//! In-memory cluster for tests
//!
//! Objects are stored as JSON keyed by resource, namespace and name. With
//! `auto_ready` on (the default) the mock plays the part of the controllers:
//! CRDs become established and register their kind, Deployments and
//! StatefulSets become available and Jobs complete as soon as they are
//! written.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use kubepack_core::{GroupResource, KubeVersion};

use super::{
    ClusterGateway, LabelSelector, ResourceAttributes, ResourceMapping, object_labels,
    object_name, object_namespace,
};
use crate::error::{KubeError, Result};

/// `resource.group`, namespace (empty for cluster-scoped), name
type ObjectKey = (String, String, String);

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub applies: usize,
    pub creates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub reviews: usize,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, JsonValue>,
    kinds: Vec<ResourceMapping>,
    denied: HashSet<(String, String, String)>,
    next_version: u64,
    counts: OperationCounts,
    /// Objects written, in order, as `Kind/namespace/name`
    writes: Vec<String>,
}

/// In-memory [`ClusterGateway`]
#[derive(Debug, Clone)]
pub struct MockGateway {
    state: Arc<Mutex<State>>,
    version: KubeVersion,
    auto_ready: bool,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// An empty cluster serving the built-in kinds
    pub fn new() -> Self {
        let state = State {
            kinds: builtin_kinds(),
            next_version: 1,
            ..Default::default()
        };
        let gateway = Self {
            state: Arc::new(Mutex::new(state)),
            version: KubeVersion::default(),
            auto_ready: true,
        };
        for ns in ["default", "kube-system"] {
            gateway.insert(
                &ResourceMapping::namespaces(),
                json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": ns}}),
            );
        }
        gateway
    }

    pub fn with_kube_version(mut self, version: KubeVersion) -> Self {
        self.version = version;
        self
    }

    /// Leave status untouched on writes, so readiness waits never succeed
    pub fn without_auto_ready(mut self) -> Self {
        self.auto_ready = false;
        self
    }

    /// Serve an extra kind, as if its CRD were installed
    pub fn with_kind(self, mapping: ResourceMapping) -> Self {
        self.lock().kinds.push(mapping);
        self
    }

    /// Serve `app.k8s.io/v1beta1` Application
    pub fn with_application_crd(self) -> Self {
        self.with_kind(ResourceMapping::applications())
    }

    /// Deny `verb` on `resource.group` in every namespace
    pub fn deny(self, verb: &str, group: &str, resource: &str) -> Self {
        self.lock()
            .denied
            .insert((verb.to_string(), group.to_string(), resource.to_string()));
        self
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().counts.clone()
    }

    /// Objects written so far, as `Kind/namespace/name`
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Look up a stored object by kind
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<JsonValue> {
        let state = self.lock();
        let mapping = state.kinds.iter().find(|m| m.kind == kind)?;
        let key = key_for(mapping, mapping.scope(namespace), name);
        state.objects.get(&key).cloned()
    }

    /// All stored objects of a kind
    pub fn objects(&self, kind: &str) -> Vec<JsonValue> {
        let state = self.lock();
        state
            .objects
            .values()
            .filter(|o| o.get("kind").and_then(JsonValue::as_str) == Some(kind))
            .cloned()
            .collect()
    }

    /// Store an object without any checks
    pub fn insert(&self, mapping: &ResourceMapping, object: JsonValue) {
        let mut state = self.lock();
        let key = key_for(mapping, mapping.scope(object_namespace(&object)), object_name(&object));
        let object = stamp(&mut state, object, None);
        state.objects.insert(key, object);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write path shared by apply, create and replace
    fn write(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<(ObjectKey, JsonValue)> {
        let name = object_name(object);
        if name.is_empty() {
            return Err(KubeError::InvalidManifest(format!(
                "{} without metadata.name",
                mapping.kind
            )));
        }
        let namespace = mapping.scope(object_namespace(object));
        if mapping.namespaced && namespace.is_none() {
            return Err(KubeError::InvalidManifest(format!(
                "{} '{name}' has no namespace",
                mapping.kind
            )));
        }

        let mut state = self.lock();
        if let Some(ns) = namespace {
            let ns_key = key_for(&ResourceMapping::namespaces(), None, ns);
            if !state.objects.contains_key(&ns_key) {
                return Err(KubeError::NotFound {
                    kind: "Namespace".to_string(),
                    name: ns.to_string(),
                    namespace: None,
                });
            }
        }
        let key = key_for(mapping, namespace, name);
        Ok((key, object.clone()))
    }

    fn store(&self, key: ObjectKey, object: JsonValue) -> JsonValue {
        let mut state = self.lock();
        let previous = state.objects.get(&key).cloned();
        let mut object = stamp(&mut state, object, previous.as_ref());
        if self.auto_ready {
            simulate_controllers(&mut state, &mut object);
        }
        state.writes.push(format!(
            "{}/{}/{}",
            object.get("kind").and_then(JsonValue::as_str).unwrap_or_default(),
            key.1,
            key.2
        ));
        state.objects.insert(key, object.clone());
        object
    }
}

fn key_for(mapping: &ResourceMapping, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        mapping.to_string(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

/// Set server-managed metadata; spec changes bump the generation
fn stamp(state: &mut State, mut object: JsonValue, previous: Option<&JsonValue>) -> JsonValue {
    let version = state.next_version;
    state.next_version += 1;

    let generation = match previous {
        Some(prev) => {
            let prev_generation = prev
                .pointer("/metadata/generation")
                .and_then(JsonValue::as_i64)
                .unwrap_or(1);
            if prev.get("spec") == object.get("spec") {
                prev_generation
            } else {
                prev_generation + 1
            }
        }
        None => 1,
    };
    let uid = previous
        .and_then(|p| p.pointer("/metadata/uid"))
        .cloned()
        .unwrap_or_else(|| json!(format!("uid-{version}")));

    if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
        metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
        metadata.insert("generation".to_string(), json!(generation));
        metadata.insert("uid".to_string(), uid);
    }
    object
}

fn simulate_controllers(state: &mut State, object: &mut JsonValue) {
    let kind = object
        .get("kind")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let generation = object
        .pointer("/metadata/generation")
        .cloned()
        .unwrap_or(json!(1));

    match kind.as_str() {
        "CustomResourceDefinition" => {
            if let Some(mapping) = super::crd_mapping(object) {
                state.kinds.retain(|m| !(m.group == mapping.group && m.kind == mapping.kind));
                state.kinds.push(mapping);
            }
            object["status"] = json!({"conditions": [
                {"type": "NamesAccepted", "status": "True"},
                {"type": "Established", "status": "True"}
            ]});
        }
        "Deployment" | "StatefulSet" => {
            object["status"] = json!({
                "observedGeneration": generation,
                "conditions": [{"type": "Available", "status": "True", "observedGeneration": generation}]
            });
        }
        "Job" => {
            object["status"] = json!({
                "succeeded": 1,
                "conditions": [{"type": "Complete", "status": "True"}]
            });
        }
        "Namespace" => {
            object["status"] = json!({"phase": "Active"});
        }
        _ => {}
    }
}

fn builtin_kinds() -> Vec<ResourceMapping> {
    let m = ResourceMapping::new;
    vec![
        ResourceMapping::namespaces(),
        m("", "v1", "ServiceAccount", "serviceaccounts", true),
        ResourceMapping::secrets(),
        m("", "v1", "ConfigMap", "configmaps", true),
        m("", "v1", "Service", "services", true),
        m("", "v1", "Pod", "pods", true),
        m("", "v1", "PersistentVolumeClaim", "persistentvolumeclaims", true),
        m("", "v1", "PersistentVolume", "persistentvolumes", false),
        m("apps", "v1", "Deployment", "deployments", true),
        m("apps", "v1", "StatefulSet", "statefulsets", true),
        m("apps", "v1", "DaemonSet", "daemonsets", true),
        m("apps", "v1", "ReplicaSet", "replicasets", true),
        m("batch", "v1", "Job", "jobs", true),
        m("batch", "v1", "CronJob", "cronjobs", true),
        m("rbac.authorization.k8s.io", "v1", "Role", "roles", true),
        m("rbac.authorization.k8s.io", "v1", "RoleBinding", "rolebindings", true),
        m("rbac.authorization.k8s.io", "v1", "ClusterRole", "clusterroles", false),
        m("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding", "clusterrolebindings", false),
        m("networking.k8s.io", "v1", "Ingress", "ingresses", true),
        m("networking.k8s.io", "v1", "NetworkPolicy", "networkpolicies", true),
        m("policy", "v1", "PodDisruptionBudget", "poddisruptionbudgets", true),
        m("admissionregistration.k8s.io", "v1", "MutatingWebhookConfiguration", "mutatingwebhookconfigurations", false),
        m("admissionregistration.k8s.io", "v1", "ValidatingWebhookConfiguration", "validatingwebhookconfigurations", false),
        m("apiregistration.k8s.io", "v1", "APIService", "apiservices", false),
        ResourceMapping::crds(),
    ]
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn server_version(&self) -> Result<KubeVersion> {
        Ok(self.version.clone())
    }

    async fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping> {
        let (group, version) = kubepack_engine::split_api_version(api_version);
        let state = self.lock();
        state
            .kinds
            .iter()
            .find(|m| m.group == group && m.kind == kind)
            .map(|m| ResourceMapping {
                version: version.to_string(),
                ..m.clone()
            })
            .ok_or_else(|| KubeError::UnknownResource {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            })
    }

    async fn resolve_resource(&self, resource: &GroupResource) -> Result<ResourceMapping> {
        let wanted = resource.resource.to_lowercase();
        let state = self.lock();
        state
            .kinds
            .iter()
            .filter(|m| resource.group.is_empty() || m.group == resource.group)
            .find(|m| m.resource == wanted || m.kind.to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| KubeError::UnknownResource {
                api_version: resource.group.clone(),
                kind: resource.resource.clone(),
            })
    }

    async fn get(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>> {
        let mut state = self.lock();
        state.counts.gets += 1;
        let key = key_for(mapping, mapping.scope(namespace), name);
        Ok(state.objects.get(&key).cloned())
    }

    async fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        let selector = selector.map(LabelSelector::parse).transpose()?;
        let mut state = self.lock();
        state.counts.lists += 1;
        let resource = mapping.to_string();
        let namespace = mapping.scope(namespace);
        Ok(state
            .objects
            .iter()
            .filter(|((r, ns, _), _)| {
                *r == resource && namespace.is_none_or(|wanted| ns == wanted)
            })
            .map(|(_, object)| object)
            .filter(|object| {
                selector
                    .as_ref()
                    .is_none_or(|s| s.matches(&object_labels(object)))
            })
            .cloned()
            .collect())
    }

    async fn apply(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        self.lock().counts.applies += 1;
        let (key, object) = self.write(mapping, object)?;
        Ok(self.store(key, object))
    }

    async fn create(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        self.lock().counts.creates += 1;
        let (key, object) = self.write(mapping, object)?;
        if self.lock().objects.contains_key(&key) {
            return Err(KubeError::AlreadyExists {
                kind: mapping.kind.clone(),
                name: key.2,
            });
        }
        Ok(self.store(key, object))
    }

    async fn replace(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        self.lock().counts.replaces += 1;
        let (key, object) = self.write(mapping, object)?;
        let stored_version = {
            let state = self.lock();
            let Some(stored) = state.objects.get(&key) else {
                return Err(KubeError::NotFound {
                    kind: mapping.kind.clone(),
                    name: key.2.clone(),
                    namespace: Some(key.1.clone()).filter(|ns| !ns.is_empty()),
                });
            };
            stored
                .pointer("/metadata/resourceVersion")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        let sent_version = object
            .pointer("/metadata/resourceVersion")
            .and_then(JsonValue::as_str);
        if sent_version.is_some_and(|sent| Some(sent) != stored_version.as_deref()) {
            return Err(KubeError::Conflict {
                kind: mapping.kind.clone(),
                name: key.2,
            });
        }
        Ok(self.store(key, object))
    }

    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let mut state = self.lock();
        state.counts.deletes += 1;
        let key = key_for(mapping, mapping.scope(namespace), name);
        Ok(state.objects.remove(&key).is_some())
    }

    async fn review_access(&self, attributes: &ResourceAttributes) -> Result<bool> {
        let mut state = self.lock();
        state.counts.reviews += 1;
        let denied = state.denied.contains(&(
            attributes.verb.clone(),
            attributes.group.clone(),
            attributes.resource.clone(),
        ));
        Ok(!denied)
    }
}
