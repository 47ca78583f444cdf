//! kubepack artifact publication
//!
//! Scripts, manifests, CRDs and Application objects produced for an order
//! are written to object storage under the order UID and served from a
//! public URL prefix.

pub mod error;
pub mod publisher;
pub mod store;

pub use error::{PublishError, Result};
pub use publisher::{Artifact, ArtifactPublisher, PUT_ATTEMPTS, ScriptFlavor, retry_put};
pub use store::BlobStore;

/// Environment variable holding the blob store URL
pub const BLOB_URL_ENV: &str = "KUBEPACK_BLOB_URL";

/// Environment variable holding the public URL prefix
pub const PUBLIC_URL_ENV: &str = "KUBEPACK_PUBLIC_URL";
