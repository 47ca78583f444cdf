//! kubepack chart registry
//!
//! Resolves chart references to loaded charts:
//!
//! - **HTTP repositories**: Helm-style repos with `index.yaml`; an empty
//!   version resolves to the highest semver in the index
//! - **Integrity**: archives are rejected when the index digest does not match
//! - **Disk cache**: archives cached under RFC 3986 normalized URL keys, with
//!   per-key locks so concurrent fetches of one chart download it once
//! - **Local charts**: a directory (`UI_WIZARD_CHARTS_DIR`) consulted first
//!
//! ## Example
//!
//! ```rust,no_run
//! use kubepack_core::ChartRef;
//! use kubepack_repo::{ChartRegistry, RegistryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryConfig::from_env().build()?;
//! let chart = registry
//!     .get_chart(&ChartRef::new("https://charts.appscode.com/stable/", "stash", ""))
//!     .await?;
//! println!("{} {}", chart.name(), chart.metadata.version);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod http;
pub mod index;
pub mod registry;

pub use cache::{DiskCache, KeyedLocks, cache_key, normalize_url};
pub use error::{RepoError, Result};
pub use http::HttpRepository;
pub use index::{ChartVersion, RepositoryIndex};
pub use registry::{
    CACHE_DIR_ENV, CHARTS_DIR_ENV, ChartRegistry, LayeredRegistry, LocalRegistry, MemoryRegistry,
    RegistryConfig, RemoteRegistry,
};
