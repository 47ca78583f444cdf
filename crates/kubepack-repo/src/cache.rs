//! On-disk chart archive cache
//!
//! Archives are stored under a key derived from the normalized repository
//! URL, chart name and resolved version. Each key has its own async lock so
//! concurrent fetches of the same chart collapse into one download.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use url::Url;

use crate::error::{RepoError, Result};

/// Normalize a repository URL per RFC 3986
///
/// Scheme and host are lowercased and default ports dropped. A trailing
/// slash survives only when the path is the root.
pub fn normalize_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| RepoError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let mut out = format!("{}://", url.scheme());
    if !url.username().is_empty() {
        out.push_str(url.username());
        if let Some(password) = url.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    // `Url::port` is already None for the scheme's default port
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }

    let path = url.path();
    if path == "/" || path.is_empty() {
        out.push('/');
    } else {
        out.push_str(path.trim_end_matches('/'));
    }
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}

/// Cache key for a resolved chart version
pub fn cache_key(repo_url: &str, name: &str, version: &str) -> Result<String> {
    Ok(format!("{}#{}@{}", normalize_url(repo_url)?, name, version))
}

/// Content-addressed archive store on the local filesystem
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$XDG_CACHE_HOME/kubepack/charts`
    pub fn default_root() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::Cache {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("kubepack").join("charts"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the archive for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&digest[..2]).join(format!("{digest}.tgz"))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an archive, writing to a temp file first so readers never see a partial file
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tgz.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Per-key async locks
///
/// Holding the guard for a key serializes every caller on that key; the
/// first caller fills the cache and the rest find it populated.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody is waiting on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently locked or awaited
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_case_and_ports() {
        assert_eq!(
            normalize_url("HTTPS://Charts.AppsCode.com:443/stable/").unwrap(),
            "https://charts.appscode.com/stable"
        );
        assert_eq!(
            normalize_url("http://example.com:80").unwrap(),
            "http://example.com/"
        );
        assert_eq!(
            normalize_url("http://example.com:8080/").unwrap(),
            "http://example.com:8080/"
        );
    }

    #[test]
    fn test_normalize_equivalent_urls_share_key() {
        let a = cache_key("https://charts.example.com/stable/", "stash", "v1").unwrap();
        let b = cache_key("https://CHARTS.example.com:443/stable", "stash", "v1").unwrap();
        assert_eq!(a, b);
        assert!(normalize_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_disk_cache_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = cache_key("https://charts.example.com", "stash", "v1").unwrap();

        assert!(cache.get(&key).await.unwrap().is_none());
        cache.put(&key, b"archive").await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some(&b"archive"[..]));
        assert!(cache.path_for(&key).starts_with(dir.path()));

        cache.remove(&key).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a").await;
        assert_eq!(locks.active(), 1);

        // A different key is not blocked
        let other = locks.lock("b").await;
        drop(other);

        drop(guard);
        let _again = locks.lock("a").await;
        assert_eq!(locks.active(), 1);
    }
}
