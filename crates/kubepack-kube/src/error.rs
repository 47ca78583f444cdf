//! Error types for kubepack-kube

use std::time::Duration;
use thiserror::Error;

/// Result type for kubepack-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to a cluster or realizing an order
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The cluster does not serve this type
    #[error("unknown resource type {api_version}/{kind}\nHint: install the CRD that defines it before this chart")]
    UnknownResource { api_version: String, kind: String },

    /// Object not found
    #[error("{kind} '{name}' not found{}", namespace.as_deref().map(|ns| format!(" in namespace '{ns}'")).unwrap_or_default())]
    NotFound {
        kind: String,
        name: String,
        namespace: Option<String>,
    },

    /// Object already exists
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency failure (stale resourceVersion)
    #[error("{kind} '{name}' was modified concurrently, retry the operation")]
    Conflict { kind: String, name: String },

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// CRD could not be applied or never became established
    #[error("failed to apply CRD {name}: {message}")]
    CrdApply { name: String, message: String },

    /// Release install, upgrade or uninstall failed
    #[error("release '{release}' failed: {message}")]
    Helm { release: String, message: String },

    /// Hook execution failed
    #[error("hook '{hook}' failed during {event}: {message}")]
    HookFailed {
        hook: String,
        event: String,
        message: String,
    },

    /// Timeout
    #[error("timed out after {} waiting for {what}", humantime::format_duration(*after))]
    Timeout { what: String, after: Duration },

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Template rendering error
    #[error(transparent)]
    Render(#[from] kubepack_engine::EngineError),

    /// Chart fetch error
    #[error(transparent)]
    Registry(#[from] kubepack_repo::RepoError),

    /// Artifact publication error
    #[error(transparent)]
    Publish(#[from] kubepack_publish::PublishError),

    #[error(transparent)]
    Core(#[from] kubepack_core::CoreError),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a 404 from the API server or a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::NotFound { .. } | KubeError::ReleaseNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            KubeError::Conflict { .. } | KubeError::AlreadyExists { .. } => true,
            _ => false,
        }
    }
}
