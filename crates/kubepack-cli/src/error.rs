//! CLI error types with exit code handling

use miette::Diagnostic;
use thiserror::Error;

use kubepack_bundle::BundleError;
use kubepack_kube::KubeError;
use kubepack_publish::PublishError;
use kubepack_repo::RepoError;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Bad configuration file or flags
    #[error("Configuration error: {message}")]
    #[diagnostic(code(kubepack::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The user's view or order cannot be used as given
    #[error("{message}")]
    #[diagnostic(code(kubepack::cli::input))]
    Input {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Chart fetch or bundle resolution failed
    #[error("{message}")]
    #[diagnostic(code(kubepack::cli::bundle))]
    Bundle { message: String },

    /// A cluster operation failed
    #[error("{message}")]
    #[diagnostic(code(kubepack::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The blob store refused a read or write
    #[error("Blob store error: {message}")]
    #[diagnostic(code(kubepack::cli::publish))]
    Publish { message: String },

    /// The permission audit found denied operations
    #[error("{denied} operation(s) would be denied")]
    #[diagnostic(
        code(kubepack::cli::audit),
        help("ask a cluster administrator for the missing RBAC permissions")
    )]
    Denied { denied: usize },

    #[error("IO error: {message}")]
    #[diagnostic(code(kubepack::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(kubepack::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        exit_codes::ERROR
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            help: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::input(format!("invalid YAML: {err}"))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::internal(err.to_string())
    }
}

impl From<kubepack_core::CoreError> for CliError {
    fn from(err: kubepack_core::CoreError) -> Self {
        CliError::input(err.to_string())
    }
}

impl From<BundleError> for CliError {
    fn from(err: BundleError) -> Self {
        let message = err.to_string();
        if err.is_input_error() {
            CliError::Input {
                message,
                help: err.help().map(|h| h.to_string()),
            }
        } else {
            CliError::Bundle { message }
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        CliError::Bundle {
            message: err.to_string(),
        }
    }
}

impl From<PublishError> for CliError {
    fn from(err: PublishError) -> Self {
        CliError::Publish {
            message: err.to_string(),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let help = match &err {
            KubeError::Timeout { .. } => {
                Some("earlier releases stay deployed; run `kubepack uninstall` to clean up".to_string())
            }
            KubeError::Helm { .. } | KubeError::CrdApply { .. } => {
                Some("the order stopped here; fix the cause and run install again".to_string())
            }
            KubeError::Api(_) => Some("check the kubeconfig context and cluster reachability".to_string()),
            _ => None,
        };
        CliError::Cluster {
            message: err.to_string(),
            help,
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
