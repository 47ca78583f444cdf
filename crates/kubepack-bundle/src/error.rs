//! Bundle resolution and order building errors

use miette::Diagnostic;
use thiserror::Error;

use kubepack_core::CoreError;
use kubepack_engine::EngineError;
use kubepack_repo::RepoError;

#[derive(Error, Debug, Diagnostic)]
pub enum BundleError {
    #[error(transparent)]
    #[diagnostic(code(kubepack::bundle::registry))]
    Registry(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] EngineError),

    #[error("chart {chart} does not contain a kubepack.com/v1alpha1 Bundle document")]
    #[diagnostic(code(kubepack::bundle::not_a_bundle))]
    NotABundle { chart: String },

    #[error("chart {chart} renders {count} Bundle documents, expected one")]
    #[diagnostic(code(kubepack::bundle::ambiguous))]
    AmbiguousBundle { chart: String, count: usize },

    #[error("bundle cycle detected: {chain}")]
    #[diagnostic(
        code(kubepack::bundle::cycle),
        help("a bundle must not include itself, directly or through nested bundles")
    )]
    CycleDetected { chain: String },

    #[error("invalid selection for {chart}: {message}")]
    #[diagnostic(code(kubepack::order::invalid_selection))]
    InvalidSelection { chart: String, message: String },

    #[error("no alternative selected for '{description}'")]
    #[diagnostic(
        code(kubepack::order::no_one_of_selection),
        help("select exactly one of: {alternatives}")
    )]
    NoOneOfSelection {
        description: String,
        alternatives: String,
    },

    #[error("release name '{name}' is {len} characters long, the limit is 53")]
    #[diagnostic(
        code(kubepack::order::release_name_too_long),
        help("multi-select charts append '-<version>' to the chart name")
    )]
    ReleaseNameTooLong { name: String, len: usize },

    #[error(transparent)]
    #[diagnostic(code(kubepack::bundle::core))]
    Core(CoreError),
}

impl From<CoreError> for BundleError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ReleaseNameTooLong { name, len } => BundleError::ReleaseNameTooLong { name, len },
            other => BundleError::Core(other),
        }
    }
}

impl BundleError {
    /// Input errors leave no side effects and should be reported to the user as-is
    pub fn is_input_error(&self) -> bool {
        match self {
            BundleError::Registry(e) => e.is_not_found(),
            BundleError::InvalidSelection { .. }
            | BundleError::NoOneOfSelection { .. }
            | BundleError::ReleaseNameTooLong { .. }
            | BundleError::CycleDetected { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
