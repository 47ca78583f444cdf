//! Artifact storage errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid blob URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported blob URL scheme '{scheme}', expected gs, s3, azblob, file or memory")]
    UnsupportedScheme { scheme: String },

    #[error("artifact not found: {key}")]
    NotFound { key: String },

    #[error("artifact {key} is not UTF-8 text")]
    NotUtf8 { key: String },

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] kubepack_core::CoreError),
}

impl PublishError {
    /// Failures that a retry cannot fix
    pub fn is_permanent(&self) -> bool {
        match self {
            PublishError::ObjectStore(e) => matches!(
                e,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented
                    | object_store::Error::UnknownConfigurationKey { .. }
            ),
            PublishError::Io(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;
