//! In-memory storage driver for tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use kubepack_core::Release;

use super::StorageDriver;
use crate::error::{KubeError, Result};

/// Counts of operations performed, for assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Debug, Default)]
struct Store {
    /// (namespace, name) -> version -> release
    releases: HashMap<(String, String), BTreeMap<u32, Release>>,
    counts: OperationCounts,
}

/// Releases held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let driver = Self::new();
        {
            let mut store = driver.lock();
            for release in releases {
                store
                    .releases
                    .entry((release.namespace.clone(), release.name.clone()))
                    .or_default()
                    .insert(release.version, release);
            }
        }
        driver
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.lock().counts.clone()
    }

    /// Count total revisions
    pub fn release_count(&self) -> usize {
        self.lock().releases.values().map(BTreeMap::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::ReleaseNotFound {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let mut store = self.lock();
        store.counts.gets += 1;
        store
            .releases
            .get(&key(namespace, name))
            .and_then(|versions| versions.get(&version))
            .cloned()
            .ok_or_else(|| not_found(namespace, name))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<Release>> {
        let mut store = self.lock();
        store.counts.lists += 1;
        Ok(store
            .releases
            .get(&key(namespace, name))
            .map(|versions| versions.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let mut store = self.lock();
        store.counts.creates += 1;
        let versions = store
            .releases
            .entry(key(&release.namespace, &release.name))
            .or_default();
        if versions.contains_key(&release.version) {
            return Err(KubeError::AlreadyExists {
                kind: "release".to_string(),
                name: release.storage_key(),
            });
        }
        versions.insert(release.version, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let mut store = self.lock();
        store.counts.updates += 1;
        let slot = store
            .releases
            .get_mut(&key(&release.namespace, &release.name))
            .and_then(|versions| versions.get_mut(&release.version))
            .ok_or_else(|| not_found(&release.namespace, &release.name))?;
        *slot = release.clone();
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<Release> {
        let mut store = self.lock();
        store.counts.deletes += 1;
        let versions = store
            .releases
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found(namespace, name))?;
        let release = versions
            .remove(&version)
            .ok_or_else(|| not_found(namespace, name))?;
        if versions.is_empty() {
            store.releases.remove(&key(namespace, name));
        }
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::release;
    use kubepack_core::ReleaseStatus;

    #[tokio::test]
    async fn test_roundtrip_and_counts() {
        let driver = MemoryDriver::with_releases(vec![release("stash", 1, ReleaseStatus::Superseded)]);
        driver.create(&release("stash", 2, ReleaseStatus::Deployed)).await.unwrap();

        let last = driver.last("kube-system", "stash").await.unwrap().unwrap();
        assert_eq!(last.version, 2);
        assert_eq!(driver.release_count(), 2);

        driver.delete_all("kube-system", "stash").await.unwrap();
        assert_eq!(driver.release_count(), 0);

        let counts = driver.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.deletes, 2);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let driver = MemoryDriver::new();
        let err = driver
            .update(&release("stash", 1, ReleaseStatus::Deployed))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
