//! Order artifacts in blob storage
//!
//! Every artifact of an order lives under `<uid>/`:
//!
//! | Artifact | Key |
//! |---|---|
//! | order | `<uid>/order.yaml` |
//! | script | `<uid>/helm3.sh` or `<uid>/script.sh` |
//! | CRD | `<uid>/crds/<crd name>.yaml` |
//! | release manifest | `<uid>/manifests/<release>.yaml` |
//! | application | `<uid>/apps/<namespace>/<name>.yaml` |
//!
//! Keys are deterministic, so republishing an order overwrites in place.

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use kubepack_core::Order;

use crate::error::{PublishError, Result};
use crate::store::BlobStore;

/// Total attempts for each write
pub const PUT_ATTEMPTS: usize = 3;

/// How an order is turned into an install script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptFlavor {
    /// `helm install` per chart
    Helm3,
    /// `kubectl apply` of pre-rendered manifests
    Yaml,
}

impl ScriptFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptFlavor::Helm3 => "helm3",
            ScriptFlavor::Yaml => "yaml",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ScriptFlavor::Helm3 => "helm3.sh",
            ScriptFlavor::Yaml => "script.sh",
        }
    }
}

impl fmt::Display for ScriptFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptFlavor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "helm3" => Ok(ScriptFlavor::Helm3),
            "yaml" => Ok(ScriptFlavor::Yaml),
            other => Err(format!("unknown script flavor '{other}', expected helm3 or yaml")),
        }
    }
}

/// An artifact kind and its key below the order prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact<'a> {
    Order,
    Script(ScriptFlavor),
    Crd(&'a str),
    Manifest(&'a str),
    Application { namespace: &'a str, name: &'a str },
}

impl Artifact<'_> {
    pub fn key(&self) -> String {
        match self {
            Artifact::Order => "order.yaml".to_string(),
            Artifact::Script(flavor) => flavor.file_name().to_string(),
            Artifact::Crd(name) => format!("crds/{name}.yaml"),
            Artifact::Manifest(release) => format!("manifests/{release}.yaml"),
            Artifact::Application { namespace, name } => format!("apps/{namespace}/{name}.yaml"),
        }
    }
}

/// Writes and reads order artifacts
#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    store: BlobStore,
    public_url: String,
    retry: ExponentialBuilder,
}

impl ArtifactPublisher {
    /// Publisher whose public URLs are derived from the store URL
    pub fn new(store: BlobStore) -> Self {
        let public_url = default_public_url(&store);
        Self {
            store,
            public_url,
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(200))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(PUT_ATTEMPTS - 1),
        }
    }

    /// Serve artifacts from `prefix` (e.g. a CDN in front of the bucket)
    pub fn with_public_url(mut self, prefix: impl Into<String>) -> Self {
        self.public_url = prefix.into();
        self
    }

    /// Override the backoff, mainly for tests
    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Write `data` to `<uid>/<key>`, retrying transient failures
    pub async fn put(&self, uid: Uuid, key: &str, data: impl Into<Bytes>) -> Result<()> {
        let path = object_key(uid, key);
        let data: Bytes = data.into();
        retry_put(self.retry, || self.store.put_bytes(&path, data.clone())).await?;
        tracing::debug!(uid = %uid, key = %key, bytes = data.len(), "published artifact");
        Ok(())
    }

    pub async fn get(&self, uid: Uuid, key: &str) -> Result<Bytes> {
        self.store.get_bytes(&object_key(uid, key)).await
    }

    pub fn public_url(&self, uid: Uuid, key: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), object_key(uid, key))
    }

    pub async fn put_artifact(&self, uid: Uuid, artifact: Artifact<'_>, data: impl Into<Bytes>) -> Result<String> {
        let key = artifact.key();
        self.put(uid, &key, data).await?;
        Ok(self.public_url(uid, &key))
    }

    /// Persist an order as `<uid>/order.yaml`
    pub async fn put_order(&self, order: &Order) -> Result<String> {
        self.put_artifact(order.uid(), Artifact::Order, order.to_yaml()?).await
    }

    pub async fn get_order(&self, uid: Uuid) -> Result<Order> {
        let key = Artifact::Order.key();
        let data = self.get(uid, &key).await?;
        let yaml = std::str::from_utf8(&data).map_err(|_| PublishError::NotUtf8 {
            key: object_key(uid, &key),
        })?;
        Ok(Order::from_yaml(yaml)?)
    }
}

fn object_key(uid: Uuid, key: &str) -> String {
    format!("{uid}/{}", key.trim_start_matches('/'))
}

/// Run a write with exponential backoff, giving up early on permanent errors
pub async fn retry_put<F, Fut>(policy: ExponentialBuilder, op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    op.retry(policy)
        .when(|e: &PublishError| !e.is_permanent())
        .notify(|e: &PublishError, after: Duration| {
            tracing::warn!(error = %e, "artifact write failed, retrying in {:.1}s", after.as_secs_f32());
        })
        .await
}

/// Public URL prefix for the well-known cloud schemes
fn default_public_url(store: &BlobStore) -> String {
    let url = store.url();
    let host = url.host_str().unwrap_or_default();
    let path = url.path().trim_end_matches('/');
    match url.scheme() {
        "gs" => format!("https://storage.googleapis.com/{host}{path}"),
        "s3" => format!("https://{host}.s3.amazonaws.com{path}"),
        "azblob" => format!("https://{host}.blob.core.windows.net{path}"),
        _ => url.as_str().trim_end_matches('/').to_string(),
    }
}
