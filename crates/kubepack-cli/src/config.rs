//! Configuration file and the settings derived from it
//!
//! `$XDG_CONFIG_HOME/kubepack/config.yaml` supplies defaults; command line
//! flags (and their environment variables) win over the file.

use indexmap::IndexMap;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kubepack_kube::DriverKind;
use kubepack_publish::{ArtifactPublisher, BlobStore};
use kubepack_repo::{ChartRegistry, RegistryConfig};

use crate::GlobalArgs;
use crate::error::{CliError, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:4000";

/// Contents of `config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigFile {
    pub blob_url: Option<String>,
    pub public_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub charts_dir: Option<PathBuf>,
    pub storage_driver: Option<String>,
    pub bind: Option<SocketAddr>,
    #[serde(with = "humantime_serde")]
    pub release_timeout: Option<Duration>,
    /// owner -> product key -> product
    pub products: IndexMap<String, IndexMap<String, Product>>,
}

/// A product line whose bundles can be compared
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub repo_url: String,
    pub bundles: Vec<String>,
    #[serde(default)]
    pub version: String,
}

impl ConfigFile {
    /// Default location, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("kubepack").join("config.yaml"))
    }

    /// Read `path`, or the default location when `path` is `None`
    ///
    /// A missing default file is an empty config; a missing explicit one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.is_file() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path).map_err(|e| CliError::Config {
            message: format!("cannot read {}: {e}", path.display()),
            help: None,
        })?;
        Self::parse(&data).map_err(|message| CliError::Config {
            message: format!("{}: {message}", path.display()),
            help: Some("see the configuration section of the README".to_string()),
        })
    }

    pub fn parse(data: &str) -> std::result::Result<Self, String> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(data).map_err(|e| e.to_string())
    }
}

/// Effective settings for a command
#[derive(Debug, Clone)]
pub struct Settings {
    pub blob_url: Option<String>,
    pub public_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub charts_dir: Option<PathBuf>,
    pub storage_driver: DriverKind,
    pub bind: SocketAddr,
    pub release_timeout: Duration,
    pub products: IndexMap<String, IndexMap<String, Product>>,
}

impl Settings {
    /// Merge flags over the file
    pub fn resolve(args: &GlobalArgs, file: ConfigFile) -> Result<Self> {
        let storage_driver = match (args.storage_driver, file.storage_driver.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some(name)) => name
                .parse()
                .map_err(|message| CliError::Config { message, help: None })?,
            (None, None) => DriverKind::default(),
        };
        let bind = match file.bind {
            Some(bind) => bind,
            None => DEFAULT_BIND.parse().map_err(|e| CliError::Config {
                message: format!("invalid bind address: {e}"),
                help: None,
            })?,
        };
        Ok(Self {
            blob_url: args.blob_url.clone().or(file.blob_url),
            public_url: args.public_url.clone().or(file.public_url),
            cache_dir: args.cache_dir.clone().or(file.cache_dir),
            charts_dir: args.charts_dir.clone().or(file.charts_dir),
            storage_driver,
            bind,
            release_timeout: file.release_timeout.unwrap_or(Duration::from_secs(300)),
            products: file.products,
        })
    }

    /// Local charts directory over the cached remote repositories
    pub fn registry(&self) -> Result<Arc<dyn ChartRegistry>> {
        let config = RegistryConfig {
            cache_dir: self.cache_dir.clone(),
            charts_dir: self.charts_dir.clone(),
        };
        Ok(config.build()?)
    }

    /// The blob store publisher, if a blob URL is configured
    pub fn publisher(&self) -> Result<Option<ArtifactPublisher>> {
        let Some(url) = &self.blob_url else {
            return Ok(None);
        };
        let mut publisher = ArtifactPublisher::new(BlobStore::new(url)?);
        if let Some(prefix) = &self.public_url {
            publisher = publisher.with_public_url(prefix.clone());
        }
        Ok(Some(publisher))
    }

    /// The publisher, for commands that cannot work without one
    pub fn require_publisher(&self) -> Result<ArtifactPublisher> {
        self.publisher()?.ok_or_else(|| CliError::Config {
            message: "no blob store configured".to_string(),
            help: Some("pass --blob-url or set KUBEPACK_BLOB_URL (e.g. gs://bucket/orders)".to_string()),
        })
    }

    pub fn product(&self, owner: &str, key: &str) -> Option<&Product> {
        self.products.get(owner).and_then(|p| p.get(key))
    }
}
