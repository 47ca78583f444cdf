//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid chart: {message}")]
    InvalidChart { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid kubeVersion constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },

    #[error("Failed to apply values patch: {message}")]
    Patch { message: String },

    #[error("Values file '{name}' not found in chart {chart}")]
    ValuesFileNotFound { chart: String, name: String },

    #[error("Invalid package reference: {message}")]
    InvalidPackage { message: String },

    #[error("Release name '{name}' is {len} characters long, the limit is 53")]
    ReleaseNameTooLong { name: String, len: usize },

    #[error("Invalid release name '{name}': must be a lowercase RFC 1123 subdomain")]
    InvalidReleaseName { name: String },

    #[error("Invalid wait condition '{condition}': expected 'delete' or 'condition=<name>[=<value>]'")]
    InvalidWaitCondition { condition: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
