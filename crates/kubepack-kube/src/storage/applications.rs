//! Application-backed storage driver
//!
//! Release payloads live in the same Secrets as the [`SecretsDriver`]; on
//! every write the Application named after the release is brought in line
//! with the revision just stored. The Application goes away with the last
//! revision.

use async_trait::async_trait;
use std::sync::Arc;

use kubepack_core::Release;
use kubepack_core::application::{APPLICATION_API_VERSION, APPLICATION_KIND};

use super::{SecretsDriver, StorageDriver};
use crate::application::ApplicationAggregator;
use crate::error::Result;
use crate::gateway::{ClusterGateway, ResourceMapping};

/// Secrets plus an Application per release
pub struct ApplicationsDriver {
    secrets: SecretsDriver,
    aggregator: ApplicationAggregator,
}

impl ApplicationsDriver {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self {
            secrets: SecretsDriver::new(gateway),
            aggregator: ApplicationAggregator::offline(),
        }
    }

    fn gateway(&self) -> &Arc<dyn ClusterGateway> {
        self.secrets.gateway()
    }

    async fn mapping(&self) -> Result<ResourceMapping> {
        self.gateway()
            .resolve_kind(APPLICATION_API_VERSION, APPLICATION_KIND)
            .await
    }

    /// Write the Application for `release`, keeping a package reference set
    /// by an earlier writer
    async fn sync_application(&self, release: &Release) -> Result<()> {
        let mapping = self.mapping().await?;
        let existing = self
            .gateway()
            .get(&mapping, Some(&release.namespace), &release.name)
            .await?;
        let package = existing
            .as_ref()
            .and_then(|app| app.pointer("/spec/package"))
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()?;

        let app = self.aggregator.aggregate(release, package).await?;
        self.gateway()
            .apply(&mapping, &serde_json::to_value(&app)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for ApplicationsDriver {
    fn name(&self) -> &'static str {
        "applications"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        self.secrets.get(namespace, name, version).await
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        self.secrets.history(namespace, name).await
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.secrets.create(release).await?;
        self.sync_application(release).await
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.secrets.update(release).await?;
        // a superseded revision no longer describes the application
        if release.info.status != kubepack_core::ReleaseStatus::Superseded {
            self.sync_application(release).await?;
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let release = self.secrets.delete(namespace, name, version).await?;
        if self.secrets.history(namespace, name).await?.is_empty() {
            let mapping = self.mapping().await?;
            self.gateway().delete(&mapping, Some(namespace), name).await?;
        }
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::storage::tests::release;
    use kubepack_core::ReleaseStatus;

    #[tokio::test]
    async fn test_application_follows_release() {
        let gateway = MockGateway::new().with_application_crd();
        let driver = ApplicationsDriver::new(Arc::new(gateway.clone()));

        let mut r = release("stash", 1, ReleaseStatus::PendingInstall);
        driver.create(&r).await.unwrap();
        let app = gateway.object("Application", Some("kube-system"), "stash").unwrap();
        assert_eq!(app["spec"]["assemblyPhase"], "Pending");
        assert_eq!(app["spec"]["componentKinds"][0]["kind"], "ServiceAccount");

        r.info.status = ReleaseStatus::Deployed;
        driver.update(&r).await.unwrap();
        let app = gateway.object("Application", Some("kube-system"), "stash").unwrap();
        assert_eq!(app["spec"]["assemblyPhase"], "Succeeded");

        driver.delete("kube-system", "stash", 1).await.unwrap();
        assert!(gateway.object("Application", Some("kube-system"), "stash").is_none());
    }

    #[tokio::test]
    async fn test_requires_application_kind() {
        let gateway = MockGateway::new();
        let driver = ApplicationsDriver::new(Arc::new(gateway));
        let err = driver
            .create(&release("stash", 1, ReleaseStatus::Deployed))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::KubeError::UnknownResource { .. }));
    }
}
