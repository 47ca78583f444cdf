//! HTTP chart repository client
//!
//! Talks to Helm-style repositories: `<repo>/index.yaml` plus archive URLs
//! listed in the index.

use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

use crate::error::{RepoError, Result};
use crate::index::{ChartVersion, RepositoryIndex};

/// HTTP client for chart repositories
#[derive(Debug, Clone)]
pub struct HttpRepository {
    client: reqwest::Client,
}

impl HttpRepository {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kubepack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::Network {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Fetch and parse `<repo_url>/index.yaml`
    pub async fn fetch_index(&self, repo_url: &str) -> Result<RepositoryIndex> {
        let index_url = index_url(repo_url)?;
        tracing::debug!(url = %index_url, "fetching repository index");

        let response = self.client.get(index_url.clone()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(RepoError::IndexNotFound {
                url: index_url.to_string(),
            }),
            status if !status.is_success() => Err(RepoError::Http {
                url: index_url.to_string(),
                status: status.as_u16(),
            }),
            _ => RepositoryIndex::from_bytes(&response.bytes().await?),
        }
    }

    /// Download a chart archive and verify its digest when the index has one
    pub async fn download(&self, repo_url: &str, entry: &ChartVersion) -> Result<Vec<u8>> {
        let name = &entry.metadata.name;
        let url = entry
            .download_url()
            .ok_or_else(|| RepoError::not_found(repo_url, name, &entry.metadata.version))?;
        let full_url = resolve_archive_url(repo_url, url)?;
        tracing::debug!(url = %full_url, chart = %name, "downloading chart archive");

        let response = self.client.get(full_url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RepoError::not_found(repo_url, name, &entry.metadata.version));
        }
        if !status.is_success() {
            return Err(RepoError::Http {
                url: full_url.to_string(),
                status: status.as_u16(),
            });
        }
        let data = response.bytes().await?.to_vec();

        if let Some(expected) = &entry.digest {
            let actual = compute_digest(&data);
            if !digest_matches(expected, &actual) {
                return Err(RepoError::DigestMismatch {
                    name: format!("{}@{}", name, entry.metadata.version),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(data)
    }
}

fn base_url(repo_url: &str) -> Result<Url> {
    let mut base = Url::parse(repo_url).map_err(|e| RepoError::InvalidUrl {
        url: repo_url.to_string(),
        reason: e.to_string(),
    })?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn index_url(repo_url: &str) -> Result<Url> {
    Ok(base_url(repo_url)?.join("index.yaml")?)
}

/// Archive URLs in an index may be relative to the repository
fn resolve_archive_url(repo_url: &str, url: &str) -> Result<Url> {
    match Url::parse(url) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(base_url(repo_url)?.join(url)?),
        Err(e) => Err(RepoError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// SHA256 digest as `sha256:<hex>`
pub fn compute_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Compare digests, ignoring case and a `sha256:` / `sha256-` prefix
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    fn normalize(d: &str) -> String {
        let d = d.trim().to_lowercase();
        d.strip_prefix("sha256:")
            .or_else(|| d.strip_prefix("sha256-"))
            .unwrap_or(&d)
            .to_string()
    }
    normalize(expected) == normalize(actual)
}
