//! kube-rs backed gateway

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes as ReviewAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

use kubepack_core::{GroupResource, KubeVersion};

use super::{ClusterGateway, FIELD_MANAGER, ResourceAttributes, ResourceMapping, object_name};
use crate::error::{KubeError, Result};

/// Gateway talking to a real API server
///
/// Discovery is cached and refreshed once on a miss, so kinds registered by
/// CRDs applied earlier in the same run resolve.
pub struct KubeGateway {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeGateway {
    /// Connect using the default kubeconfig / in-cluster config
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Self::with_client(client).await
    }

    pub async fn with_client(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Re-run discovery (after CRD changes)
    pub async fn refresh_discovery(&self) -> Result<()> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = discovery;
        Ok(())
    }

    async fn lookup_kind(&self, gvk: &GroupVersionKind) -> Option<ResourceMapping> {
        let discovery = self.discovery.read().await;
        discovery
            .resolve_gvk(gvk)
            .map(|(ar, caps)| mapping_from(&ar, caps.scope == Scope::Namespaced))
    }

    async fn lookup_resource(&self, resource: &GroupResource) -> Option<ResourceMapping> {
        let discovery = self.discovery.read().await;
        let wanted = resource.resource.to_lowercase();
        for group in discovery.groups() {
            if !resource.group.is_empty() && group.name() != resource.group {
                continue;
            }
            for (ar, caps) in group.recommended_resources() {
                if ar.plural == wanted || ar.kind.to_lowercase() == wanted {
                    return Some(mapping_from(&ar, caps.scope == Scope::Namespaced));
                }
            }
        }
        None
    }

    fn api(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource {
            group: mapping.group.clone(),
            version: mapping.version.clone(),
            api_version: mapping.api_version(),
            kind: mapping.kind.clone(),
            plural: mapping.resource.clone(),
        };
        match mapping.scope(namespace) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn mapping_from(ar: &ApiResource, namespaced: bool) -> ResourceMapping {
    ResourceMapping::new(&ar.group, &ar.version, &ar.kind, &ar.plural, namespaced)
}

fn to_dynamic(object: &JsonValue) -> Result<DynamicObject> {
    Ok(serde_json::from_value(object.clone())?)
}

fn from_dynamic(object: DynamicObject) -> Result<JsonValue> {
    Ok(serde_json::to_value(object)?)
}

fn api_error_code(e: &kube::Error) -> Option<u16> {
    match e {
        kube::Error::Api(resp) => Some(resp.code),
        _ => None,
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn server_version(&self) -> Result<KubeVersion> {
        let info = self.client.apiserver_version().await?;
        Ok(KubeVersion::parse(&info.git_version)?)
    }

    async fn resolve_kind(&self, api_version: &str, kind: &str) -> Result<ResourceMapping> {
        let (group, version) = kubepack_engine::split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        if let Some(mapping) = self.lookup_kind(&gvk).await {
            return Ok(mapping);
        }
        self.refresh_discovery().await?;
        self.lookup_kind(&gvk)
            .await
            .ok_or_else(|| KubeError::UnknownResource {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            })
    }

    async fn resolve_resource(&self, resource: &GroupResource) -> Result<ResourceMapping> {
        if let Some(mapping) = self.lookup_resource(resource).await {
            return Ok(mapping);
        }
        self.refresh_discovery().await?;
        self.lookup_resource(resource)
            .await
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
        match self.api(mapping, namespace).get_opt(name).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Result<Vec<JsonValue>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let list = self.api(mapping, namespace).list(&params).await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn apply(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        let dynamic = to_dynamic(object)?;
        let name = object_name(object);
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        let applied = self
            .api(mapping, super::object_namespace(object))
            .patch(name, &params, &Patch::Apply(&dynamic))
            .await?;
        from_dynamic(applied)
    }

    async fn create(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        let dynamic = to_dynamic(object)?;
        match self
            .api(mapping, super::object_namespace(object))
            .create(&PostParams::default(), &dynamic)
            .await
        {
            Ok(created) => from_dynamic(created),
            Err(e) if api_error_code(&e) == Some(409) => Err(KubeError::AlreadyExists {
                kind: mapping.kind.clone(),
                name: object_name(object).to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, mapping: &ResourceMapping, object: &JsonValue) -> Result<JsonValue> {
        let dynamic = to_dynamic(object)?;
        let name = object_name(object);
        match self
            .api(mapping, super::object_namespace(object))
            .replace(name, &PostParams::default(), &dynamic)
            .await
        {
            Ok(replaced) => from_dynamic(replaced),
            Err(e) if api_error_code(&e) == Some(409) => Err(KubeError::Conflict {
                kind: mapping.kind.clone(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        match self
            .api(mapping, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if api_error_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn review_access(&self, attributes: &ResourceAttributes) -> Result<bool> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ReviewAttributes {
                    namespace: Some(attributes.namespace.clone()).filter(|ns| !ns.is_empty()),
                    verb: Some(attributes.verb.clone()),
                    group: Some(attributes.group.clone()),
                    version: Some(attributes.version.clone()),
                    resource: Some(attributes.resource.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = api.create(&PostParams::default(), &review).await?;
        Ok(response.status.is_some_and(|s| s.allowed))
    }
}
