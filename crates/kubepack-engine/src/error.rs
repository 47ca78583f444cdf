//! Renderer error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use kubepack_core::CoreError;

/// Main renderer error type
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    #[error("chart {chart} is not installable: type is '{chart_type}'")]
    #[diagnostic(
        code(kubepack::render::not_installable),
        help("only charts of type 'application' can be rendered for install")
    )]
    NotInstallable { chart: String, chart_type: String },

    #[error("chart {chart} requires kubeVersion {constraint}, cluster is {kube_version}")]
    #[diagnostic(code(kubepack::render::kube_version))]
    IncompatibleKubeVersion {
        chart: String,
        constraint: String,
        kube_version: String,
    },

    #[error("chart {chart} depends on {dependency}, which is not present in charts/")]
    #[diagnostic(
        code(kubepack::render::dependency),
        help("vendor the dependency into the chart before packaging")
    )]
    DependencyUnresolved { chart: String, dependency: String },

    #[error("invalid manifest in {template}: {message}")]
    #[diagnostic(code(kubepack::render::manifest))]
    InvalidManifest { template: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for renderer operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    Syntax,
    Type,
    Other,
}

/// A template failed to parse or render
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{template}: {message}")]
#[diagnostic(code(kubepack::template::render))]
pub struct TemplateError {
    /// Chart-qualified template path
    pub template: String,

    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub help: Option<String>,
}

impl TemplateError {
    /// Build from a MiniJinja error, pointing at the failing line
    pub fn from_minijinja(err: minijinja::Error, template: &str, source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
            minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::Syntax,
            minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
                TemplateErrorKind::Type
            }
            _ => TemplateErrorKind::Other,
        };

        let message = match err.detail() {
            Some(detail) => detail.to_string(),
            None => err.to_string(),
        };

        let help = match kind {
            TemplateErrorKind::UndefinedVariable => {
                Some("use `| default(...)` for optional values".to_string())
            }
            TemplateErrorKind::Syntax => Some(
                "check bracket matching: `{{ }}` for expressions, `{% %}` for statements"
                    .to_string(),
            ),
            _ => None,
        };

        Self {
            template: template.to_string(),
            message,
            kind,
            span: err.line().and_then(|line| line_span(source, line)),
            src: NamedSource::new(template, source.to_string()),
            help,
        }
    }

    /// An error with no source to point at
    pub fn simple(template: &str, message: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new(template, String::new()),
            span: None,
            help: None,
        }
    }
}

/// Span covering line `line_num` (1-based) of `source`
fn line_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }
    None
}
