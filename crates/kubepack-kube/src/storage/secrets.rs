//! Kubernetes Secrets storage driver
//!
//! Wire-compatible with Helm 3's default driver. Updates carry the
//! `resourceVersion` read just before, so a concurrent writer to the same
//! revision gets a conflict instead of a lost update.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

use kubepack_core::Release;
use kubepack_core::release::storage_key;

use super::{RELEASE_OWNER, RELEASE_SECRET_TYPE, StorageDriver, decode_release, encode_release, storage_labels};
use crate::error::{KubeError, Result};
use crate::gateway::{ClusterGateway, ResourceMapping};

/// Kubernetes Secrets storage driver
pub struct SecretsDriver {
    gateway: Arc<dyn ClusterGateway>,
}

impl SecretsDriver {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn ClusterGateway> {
        &self.gateway
    }

    /// Build the Secret object for a release
    ///
    /// Secret `data` is base64 on the wire, on top of Helm's own base64.
    pub fn build_secret(release: &Release) -> Result<JsonValue> {
        let encoded = encode_release(release)?;
        Ok(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": release.storage_key(),
                "namespace": release.namespace,
                "labels": storage_labels(release),
            },
            "type": RELEASE_SECRET_TYPE,
            "data": {"release": STANDARD.encode(encoded.as_bytes())},
        }))
    }

    /// Parse a release from a Secret object
    pub fn parse_secret(secret: &JsonValue) -> Result<Release> {
        let data = secret
            .pointer("/data/release")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;
        let inner = STANDARD
            .decode(data)
            .map_err(|e| KubeError::Storage(format!("base64 decode error: {e}")))?;
        let encoded = String::from_utf8(inner)
            .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {e}")))?;
        decode_release(&encoded)
    }

    fn not_found(namespace: &str, name: &str) -> KubeError {
        KubeError::ReleaseNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    fn name(&self) -> &'static str {
        "secrets"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let secret = self
            .gateway
            .get(&ResourceMapping::secrets(), Some(namespace), &storage_key(name, version))
            .await?
            .ok_or_else(|| Self::not_found(namespace, name))?;
        Self::parse_secret(&secret)
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let selector = format!("owner={RELEASE_OWNER},name={name}");
        let secrets = self
            .gateway
            .list(&ResourceMapping::secrets(), Some(namespace), Some(&selector))
            .await?;

        let mut releases = Vec::with_capacity(secrets.len());
        for secret in &secrets {
            match Self::parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(
                    release = %name,
                    namespace = %namespace,
                    error = %e,
                    "skipping unreadable release record"
                ),
            }
        }

        // Sort by version descending (newest first)
        releases.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(releases)
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let secret = Self::build_secret(release)?;
        self.gateway
            .create(&ResourceMapping::secrets(), &secret)
            .await?;
        tracing::debug!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.version,
            status = %release.info.status,
            "stored release"
        );
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let mapping = ResourceMapping::secrets();
        let key = release.storage_key();
        let current = self
            .gateway
            .get(&mapping, Some(&release.namespace), &key)
            .await?
            .ok_or_else(|| Self::not_found(&release.namespace, &release.name))?;

        let mut secret = Self::build_secret(release)?;
        if let Some(version) = current.pointer("/metadata/resourceVersion") {
            secret["metadata"]["resourceVersion"] = version.clone();
        }
        self.gateway.replace(&mapping, &secret).await?;
        tracing::debug!(
            release = %release.name,
            namespace = %release.namespace,
            revision = release.version,
            status = %release.info.status,
            "updated release"
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.get(namespace, name, version).await?;
        self.gateway
            .delete(&ResourceMapping::secrets(), Some(namespace), &storage_key(name, version))
            .await?;
        Ok(release)
    }
}
