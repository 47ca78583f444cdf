//! Storage drivers for persisting release information
//!
//! - **secrets** (default): one Secret per revision, in Helm's own format,
//!   so `helm list` and `helm status` see kubepack releases
//! - **applications**: the same Secrets plus an Application object kept
//!   in step with the latest revision
//! - **memory**: for tests
//!
//! Secret payload: `base64(gzip(json(release)))`, labels `name`, `owner=helm`,
//! `status` and `version`, type `helm.sh/release.v1`.

mod applications;
mod memory;
mod secrets;

pub use applications::ApplicationsDriver;
pub use memory::{MemoryDriver, OperationCounts};
pub use secrets::SecretsDriver;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use kubepack_core::Release;

use crate::error::{KubeError, Result};
use crate::gateway::ClusterGateway;

/// Secret type of Helm 3 release records
pub const RELEASE_SECRET_TYPE: &str = "helm.sh/release.v1";

/// Owner label value Helm uses for its release records
pub const RELEASE_OWNER: &str = "helm";

/// Environment variable selecting the driver
pub const STORAGE_DRIVER_ENV: &str = "KUBEPACK_STORAGE_DRIVER";

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Storage driver trait for release persistence
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name as selected on the command line
    fn name(&self) -> &'static str;

    /// Get a specific release revision
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// All revisions of a release, newest first
    ///
    /// An unknown release has an empty history.
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>>;

    /// Store a new revision; fails if it exists
    async fn create(&self, release: &Release) -> Result<()>;

    /// Overwrite an existing revision
    async fn update(&self, release: &Release) -> Result<()>;

    /// Delete a revision, returning it
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release>;

    /// Latest revision, if any
    async fn last(&self, namespace: &str, name: &str) -> Result<Option<Release>> {
        Ok(self.history(namespace, name).await?.into_iter().next())
    }

    /// Delete every revision of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut deleted = Vec::new();
        for release in self.history(namespace, name).await? {
            deleted.push(self.delete(namespace, name, release.version).await?);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl<T: StorageDriver + ?Sized> StorageDriver for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        (**self).get(namespace, name, version).await
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        (**self).history(namespace, name).await
    }

    async fn create(&self, release: &Release) -> Result<()> {
        (**self).create(release).await
    }

    async fn update(&self, release: &Release) -> Result<()> {
        (**self).update(release).await
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        (**self).delete(namespace, name, version).await
    }
}

/// Which release driver to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DriverKind {
    #[default]
    Secrets,
    Applications,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Secrets => "secrets",
            DriverKind::Applications => "applications",
        }
    }

    /// Build the driver on top of a gateway
    pub fn build(self, gateway: Arc<dyn ClusterGateway>) -> Arc<dyn StorageDriver> {
        match self {
            DriverKind::Secrets => Arc::new(SecretsDriver::new(gateway)),
            DriverKind::Applications => Arc::new(ApplicationsDriver::new(gateway)),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "secret" | "secrets" => Ok(DriverKind::Secrets),
            "application" | "applications" => Ok(DriverKind::Applications),
            other => Err(format!(
                "unknown storage driver '{other}', expected secrets or applications"
            )),
        }
    }
}

/// Encode a release the way Helm does: JSON, gzip, base64
pub fn encode_release(release: &Release) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(&json)
        .map_err(|e| KubeError::Storage(format!("gzip error: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| KubeError::Storage(format!("gzip error: {e}")))?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a release record; payloads without the gzip header are plain JSON
pub fn decode_release(data: &str) -> Result<Release> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Storage(format!("base64 decode error: {e}")))?;
    let json = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decompressed)
            .map_err(|e| KubeError::Storage(format!("gzip error: {e}")))?;
        decompressed
    } else {
        bytes
    };
    Ok(serde_json::from_slice(&json)?)
}

/// Labels on a release record
pub fn storage_labels(release: &Release) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("name".to_string(), release.name.clone()),
        ("owner".to_string(), RELEASE_OWNER.to_string()),
        ("status".to_string(), release.info.status.to_string()),
        ("version".to_string(), release.version.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubepack_core::{ReleaseInfo, ReleaseStatus};

    pub(crate) fn release(name: &str, version: u32, status: ReleaseStatus) -> Release {
        Release {
            name: name.to_string(),
            info: ReleaseInfo {
                status,
                description: "Install complete".to_string(),
                ..Default::default()
            },
            chart: Default::default(),
            config: serde_json::json!({"replicas": 2}),
            manifest: "---\n# Source: stash/templates/sa.yaml\napiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: stash\n".to_string(),
            hooks: Vec::new(),
            version,
            namespace: "kube-system".to_string(),
        }
    }

    #[test]
    fn test_encode_is_gzip() {
        let encoded = encode_release(&release("stash", 1, ReleaseStatus::Deployed)).unwrap();
        let raw = STANDARD.decode(&encoded).unwrap();
        assert!(raw.starts_with(&GZIP_MAGIC));
        assert_eq!(decode_release(&encoded).unwrap().name, "stash");
    }

    #[test]
    fn test_decode_plain_json() {
        let json = serde_json::to_vec(&release("stash", 3, ReleaseStatus::Failed)).unwrap();
        let decoded = decode_release(&STANDARD.encode(json)).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.info.status, ReleaseStatus::Failed);
    }

    #[test]
    fn test_labels() {
        let labels = storage_labels(&release("stash", 2, ReleaseStatus::Superseded));
        assert_eq!(labels["owner"], "helm");
        assert_eq!(labels["status"], "superseded");
        assert_eq!(labels["version"], "2");
    }

    #[test]
    fn test_driver_kind() {
        assert_eq!("Secrets".parse::<DriverKind>().unwrap(), DriverKind::Secrets);
        assert_eq!("applications".parse::<DriverKind>().unwrap(), DriverKind::Applications);
        assert!("configmaps".parse::<DriverKind>().is_err());
    }
}
