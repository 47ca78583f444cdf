//! Error types for chart registry operations

use thiserror::Error;

/// Chart registry errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Lookup Errors ============
    #[error("Chart not found: {name}{} in {url}", version_suffix(.version))]
    NotFound {
        url: String,
        name: String,
        version: String,
    },

    #[error("Repository index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    // ============ Network Errors ============
    #[error("HTTP error fetching {url}: {status}")]
    Http { url: String, status: u16 },

    #[error("Network error: {message}")]
    Network { message: String },

    // ============ Content Errors ============
    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid chart archive for {name}: {source}")]
    InvalidArchive {
        name: String,
        #[source]
        source: kubepack_core::CoreError,
    },

    // ============ Cache Errors ============
    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] kubepack_core::CoreError),
}

fn version_suffix(version: &str) -> String {
    if version.is_empty() {
        String::new()
    } else {
        format!("@{version}")
    }
}

impl RepoError {
    pub fn not_found(url: &str, name: &str, version: &str) -> Self {
        RepoError::NotFound {
            url: url.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// The chart, version or repository index does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound { .. } | RepoError::IndexNotFound { .. }
        )
    }

    /// Network failures may succeed on retry; everything else is final
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoError::Network { .. } => true,
            RepoError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        match (e.status(), e.url()) {
            (Some(status), Some(url)) => RepoError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => RepoError::Network {
                message: e.to_string(),
            },
        }
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
