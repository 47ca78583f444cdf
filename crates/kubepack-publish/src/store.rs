//! URL-addressed blob storage
//!
//! A [`BlobStore`] wraps an `ObjectStore` chosen by the URL scheme and keeps
//! the URL's path as a key prefix, so `gs://bucket/artifacts/` writes every
//! key under `artifacts/`.

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use url::Url;

use crate::error::{PublishError, Result};

#[derive(Debug, Clone)]
pub struct BlobStore {
    url: Url,
    store: Arc<PrefixStore<Box<dyn ObjectStore>>>,
}

impl BlobStore {
    /// Open the store for a `gs://`, `s3://`, `azblob://`, `file://` or `memory://` URL
    ///
    /// Cloud credentials come from the environment of the matching SDK,
    /// e.g. `GOOGLE_APPLICATION_CREDENTIALS` or `AWS_ACCESS_KEY_ID`.
    pub fn new(location: &str) -> Result<Self> {
        let mut location = location.trim().to_string();
        if !location.ends_with('/') {
            location.push('/');
        }
        let url = Url::parse(&location).map_err(|e| PublishError::InvalidUrl {
            url: location.clone(),
            reason: e.to_string(),
        })?;

        let bucket = || {
            url.host_str()
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .ok_or_else(|| PublishError::InvalidUrl {
                    url: location.clone(),
                    reason: "missing bucket name".to_string(),
                })
        };

        let (store, prefix): (Box<dyn ObjectStore>, String) = match url.scheme() {
            "gs" => (
                Box::new(
                    GoogleCloudStorageBuilder::from_env()
                        .with_bucket_name(bucket()?)
                        .build()?,
                ),
                url.path().to_string(),
            ),
            "s3" => (
                Box::new(AmazonS3Builder::from_env().with_bucket_name(bucket()?).build()?),
                url.path().to_string(),
            ),
            "azblob" => (
                Box::new(
                    MicrosoftAzureBuilder::from_env()
                        .with_container_name(bucket()?)
                        .build()?,
                ),
                url.path().to_string(),
            ),
            "file" => {
                let dir = url.to_file_path().map_err(|()| PublishError::InvalidUrl {
                    url: location.clone(),
                    reason: "not a local directory".to_string(),
                })?;
                std::fs::create_dir_all(&dir)?;
                // The local store is already rooted at the directory
                (Box::new(LocalFileSystem::new_with_prefix(&dir)?), String::new())
            }
            "memory" => (Box::new(InMemory::new()), String::new()),
            other => {
                return Err(PublishError::UnsupportedScheme {
                    scheme: other.to_string(),
                });
            }
        };

        tracing::debug!(url = %url, "opened blob store");
        Ok(Self {
            store: Arc::new(PrefixStore::new(store, prefix.as_str())),
            url,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            url: Url::parse("memory://in_memory_store/").expect("static URL is valid"),
            store: Arc::new(PrefixStore::new(Box::new(InMemory::new()), "")),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn put_bytes(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&Path::from(key), PutPayload::from(data))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        match self.store.get(&Path::from(key)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(PublishError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_string(&self, key: &str) -> Result<String> {
        let bytes = self.get_bytes(key).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PublishError::NotUtf8 {
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blob store at {}", self.url)
    }
}
