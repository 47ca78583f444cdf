//! Chart registries
//!
//! A [`ChartRegistry`] turns a `(repository URL, name, version)` reference
//! into a loaded [`Chart`]. The remote registry caches archives on disk; a
//! local charts directory can be layered in front of it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::RwLock as AsyncRwLock;

use kubepack_core::archive::load_archive;
use kubepack_core::{Chart, ChartRef};

use crate::cache::{DiskCache, KeyedLocks, cache_key, normalize_url};
use crate::error::{RepoError, Result};
use crate::http::HttpRepository;
use crate::index::{RepositoryIndex, parse_version};

/// Environment variable naming a local charts directory consulted first
pub const CHARTS_DIR_ENV: &str = "UI_WIZARD_CHARTS_DIR";

/// Environment variable overriding the archive cache directory
pub const CACHE_DIR_ENV: &str = "KUBEPACK_CACHE_DIR";

/// Source of charts
#[async_trait]
pub trait ChartRegistry: Send + Sync {
    /// Load a chart; an empty version means the highest semver in the repository
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart>;
}

#[async_trait]
impl<T: ChartRegistry + ?Sized> ChartRegistry for Arc<T> {
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart> {
        (**self).get_chart(chart).await
    }
}

fn parse_archive(chart: &ChartRef, data: &[u8]) -> Result<Chart> {
    load_archive(data).map_err(|source| RepoError::InvalidArchive {
        name: chart.to_string(),
        source,
    })
}

fn same_version(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va == vb,
        _ => a.trim_start_matches('v') == b.trim_start_matches('v'),
    }
}

// ============ Remote ============

/// Helm HTTP repositories behind an on-disk archive cache
///
/// Identical references always yield the same archive bytes: once an
/// archive is cached it is served from disk. Concurrent requests for one
/// chart version share a single download.
pub struct RemoteRegistry {
    http: HttpRepository,
    cache: DiskCache,
    locks: KeyedLocks,
    indexes: AsyncRwLock<HashMap<String, Arc<RepositoryIndex>>>,
}

impl RemoteRegistry {
    pub fn new(cache: DiskCache) -> Result<Self> {
        Ok(Self::with_client(HttpRepository::new()?, cache))
    }

    pub fn with_client(http: HttpRepository, cache: DiskCache) -> Self {
        Self {
            http,
            cache,
            locks: KeyedLocks::new(),
            indexes: AsyncRwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Repository index, fetched once per process and repository
    pub async fn index(&self, repo_url: &str) -> Result<Arc<RepositoryIndex>> {
        let key = normalize_url(repo_url)?;
        if let Some(index) = self.indexes.read().await.get(&key) {
            return Ok(index.clone());
        }

        let _guard = self.locks.lock(&format!("index:{key}")).await;
        if let Some(index) = self.indexes.read().await.get(&key) {
            return Ok(index.clone());
        }
        let index = Arc::new(self.http.fetch_index(repo_url).await?);
        self.indexes.write().await.insert(key, index.clone());
        Ok(index)
    }

    /// Forget cached indexes so the next lookup refetches them
    pub async fn refresh(&self) {
        self.indexes.write().await.clear();
    }

    /// Raw archive bytes for a chart reference
    pub async fn get_archive(&self, chart: &ChartRef) -> Result<Vec<u8>> {
        // A pinned version can be served from disk without touching the index
        if !chart.version.is_empty() {
            let key = cache_key(&chart.url, &chart.name, &chart.version)?;
            if let Some(data) = self.cache.get(&key).await? {
                tracing::debug!(chart = %chart, "chart archive served from cache");
                return Ok(data);
            }
        }

        let index = self.index(&chart.url).await?;
        let entry = index
            .resolve(&chart.name, &chart.version)
            .ok_or_else(|| RepoError::not_found(&chart.url, &chart.name, &chart.version))?;

        let version = if chart.version.is_empty() {
            entry.metadata.version.as_str()
        } else {
            chart.version.as_str()
        };
        let key = cache_key(&chart.url, &chart.name, version)?;

        let _guard = self.locks.lock(&key).await;
        if let Some(data) = self.cache.get(&key).await? {
            return Ok(data);
        }

        let data = self.http.download(&chart.url, entry).await?;
        // Never cache an archive that does not load
        parse_archive(chart, &data)?;
        self.cache.put(&key, &data).await?;
        tracing::info!(chart = %chart.name, version = %version, "downloaded chart");
        Ok(data)
    }
}

#[async_trait]
impl ChartRegistry for RemoteRegistry {
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart> {
        let data = self.get_archive(chart).await?;
        parse_archive(chart, &data)
    }
}

// ============ Local directory ============

/// Charts unpacked or archived in a local directory
///
/// `<dir>/<name>/` is used when its version matches (or no version is
/// requested); otherwise `<dir>/<name>-<version>.tgz` is tried. The
/// repository URL is ignored.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    dir: PathBuf,
}

impl LocalRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(&self, chart: &ChartRef) -> Result<Option<Chart>> {
        let unpacked = self.dir.join(&chart.name);
        if unpacked.join("Chart.yaml").is_file() {
            let loaded = Chart::load_dir(&unpacked)?;
            if chart.version.is_empty() || same_version(&loaded.metadata.version, &chart.version) {
                return Ok(Some(loaded));
            }
        }

        if !chart.version.is_empty() {
            for version in [chart.version.clone(), format!("v{}", chart.version.trim_start_matches('v'))] {
                let archive = self.dir.join(format!("{}-{}.tgz", chart.name, version));
                if archive.is_file() {
                    let data = std::fs::read(&archive)?;
                    return parse_archive(chart, &data).map(Some);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ChartRegistry for LocalRegistry {
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart> {
        self.load(chart)?
            .ok_or_else(|| RepoError::not_found(&self.dir.display().to_string(), &chart.name, &chart.version))
    }
}

// ============ Layering ============

/// Consult `primary` first, falling back to `fallback` when it has no such chart
pub struct LayeredRegistry<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> LayeredRegistry<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: ChartRegistry, F: ChartRegistry> ChartRegistry for LayeredRegistry<P, F> {
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart> {
        match self.primary.get_chart(chart).await {
            Err(e) if e.is_not_found() => self.fallback.get_chart(chart).await,
            other => other,
        }
    }
}

// ============ In-memory ============

/// Registry backed by charts held in memory
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    charts: RwLock<HashMap<(String, String), Vec<Chart>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a chart under a repository URL
    pub fn insert(&self, repo_url: &str, chart: Chart) {
        let key = (
            normalize_url(repo_url).unwrap_or_else(|_| repo_url.to_string()),
            chart.name().to_string(),
        );
        let mut charts = self.charts.write().unwrap_or_else(|e| e.into_inner());
        let versions = charts.entry(key).or_default();
        versions.retain(|c| c.metadata.version != chart.metadata.version);
        versions.push(chart);
    }

    pub fn with_chart(self, repo_url: &str, chart: Chart) -> Self {
        self.insert(repo_url, chart);
        self
    }
}

#[async_trait]
impl ChartRegistry for MemoryRegistry {
    async fn get_chart(&self, chart: &ChartRef) -> Result<Chart> {
        let key = (
            normalize_url(&chart.url).unwrap_or_else(|_| chart.url.clone()),
            chart.name.clone(),
        );
        let charts = self.charts.read().unwrap_or_else(|e| e.into_inner());
        let versions = charts
            .get(&key)
            .ok_or_else(|| RepoError::not_found(&chart.url, &chart.name, &chart.version))?;

        let found = if chart.version.is_empty() {
            versions.iter().max_by(|a, b| {
                parse_version(&a.metadata.version).cmp(&parse_version(&b.metadata.version))
            })
        } else {
            versions
                .iter()
                .find(|c| same_version(&c.metadata.version, &chart.version))
        };
        found
            .cloned()
            .ok_or_else(|| RepoError::not_found(&chart.url, &chart.name, &chart.version))
    }
}

// ============ Construction ============

/// Where the default registry stack reads and caches charts
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Archive cache; defaults to `$XDG_CACHE_HOME/kubepack/charts`
    pub cache_dir: Option<PathBuf>,
    /// Local charts directory consulted before any remote fetch
    pub charts_dir: Option<PathBuf>,
}

impl RegistryConfig {
    /// Read `KUBEPACK_CACHE_DIR` and `UI_WIZARD_CHARTS_DIR`
    pub fn from_env() -> Self {
        let var = |name| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            cache_dir: var(CACHE_DIR_ENV),
            charts_dir: var(CHARTS_DIR_ENV),
        }
    }

    /// Build the registry stack: local directory (if any) over the cached remote
    pub fn build(self) -> Result<Arc<dyn ChartRegistry>> {
        let cache_root = match self.cache_dir {
            Some(dir) => dir,
            None => DiskCache::default_root()?,
        };
        let remote = RemoteRegistry::new(DiskCache::new(cache_root))?;
        Ok(match self.charts_dir {
            Some(dir) => {
                tracing::debug!(dir = %dir.display(), "using local charts directory");
                Arc::new(LayeredRegistry::new(LocalRegistry::new(dir), remote))
            }
            None => Arc::new(remote),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubepack_core::archive::create_archive;
    use tempfile::TempDir;

    const REPO: &str = "https://charts.example.com/stable";

    fn chart(name: &str, version: &str) -> Chart {
        Chart::from_files(vec![(
            "Chart.yaml".to_string(),
            format!("apiVersion: v2\nname: {name}\nversion: {version}\n").into_bytes(),
        )])
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_registry_latest() {
        let registry = MemoryRegistry::new()
            .with_chart(REPO, chart("stash", "v0.9.0"))
            .with_chart(REPO, chart("stash", "v0.10.0"));

        let latest = registry.get_chart(&ChartRef::new(REPO, "stash", "")).await.unwrap();
        assert_eq!(latest.metadata.version, "v0.10.0");

        // URL normalization applies to lookups too
        let pinned = registry
            .get_chart(&ChartRef::new("https://CHARTS.example.com/stable/", "stash", "0.9.0"))
            .await
            .unwrap();
        assert_eq!(pinned.metadata.version, "v0.9.0");

        let err = registry
            .get_chart(&ChartRef::new(REPO, "stash", "v2.0.0"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_registry_dir_and_archive() {
        let dir = TempDir::new().unwrap();
        let unpacked = dir.path().join("stash");
        std::fs::create_dir_all(&unpacked).unwrap();
        std::fs::write(unpacked.join("Chart.yaml"), "apiVersion: v2\nname: stash\nversion: v0.9.0\n")
            .unwrap();
        std::fs::write(
            dir.path().join("stash-v0.8.0.tgz"),
            create_archive(&chart("stash", "v0.8.0")).unwrap(),
        )
        .unwrap();

        let local = LocalRegistry::new(dir.path());
        let any = local.get_chart(&ChartRef::new(REPO, "stash", "")).await.unwrap();
        assert_eq!(any.metadata.version, "v0.9.0");

        let older = local.get_chart(&ChartRef::new(REPO, "stash", "v0.8.0")).await.unwrap();
        assert_eq!(older.metadata.version, "v0.8.0");

        let missing = local.get_chart(&ChartRef::new(REPO, "stash", "v0.7.0")).await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_layered_falls_back_on_not_found() {
        let dir = TempDir::new().unwrap();
        let layered = LayeredRegistry::new(
            LocalRegistry::new(dir.path()),
            MemoryRegistry::new().with_chart(REPO, chart("kubedb", "v0.13.0")),
        );
        let found = layered
            .get_chart(&ChartRef::new(REPO, "kubedb", "v0.13.0"))
            .await
            .unwrap();
        assert_eq!(found.name(), "kubedb");
    }

    #[tokio::test]
    async fn test_invalid_local_archive_is_fatal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken-1.0.0.tgz"), b"not gzip").unwrap();
        let layered = LayeredRegistry::new(
            LocalRegistry::new(dir.path()),
            MemoryRegistry::new().with_chart(REPO, chart("broken", "1.0.0")),
        );
        let err = layered
            .get_chart(&ChartRef::new(REPO, "broken", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidArchive { .. }));
    }

    #[test]
    fn test_config_build_without_charts_dir() {
        let config = RegistryConfig {
            cache_dir: Some(PathBuf::from("/tmp/cache")),
            charts_dir: None,
        };
        assert!(config.build().is_ok());
    }
}
