//! API error responses
//!
//! Every failure is answered with `{"error_code": ..., "error_message": ...}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt::Display;
use uuid::Uuid;

use kubepack_bundle::BundleError;
use kubepack_kube::KubeError;
use kubepack_publish::PublishError;

pub type BoxRequestError = Box<dyn RequestError>;

pub trait RequestError: Display + Send + Sync + 'static {
    fn error_code(&self) -> &'static str;
    fn status_code(&self) -> StatusCode;
}

impl IntoResponse for BoxRequestError {
    fn into_response(self) -> Response {
        let body = json!({
            "error_code": self.error_code(),
            "error_message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl<E: RequestError> From<E> for BoxRequestError {
    fn from(e: E) -> Self {
        Box::new(e)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid query parameters: {0}")]
    InvalidQueryParam(#[source] QueryRejection),

    #[error("invalid path: {0}")]
    InvalidPath(#[source] PathRejection),

    #[error("invalid request body: {0}")]
    InvalidBody(#[source] JsonRejection),

    #[error("unknown script flavor '{0}', expected helm3 or yaml")]
    UnknownFlavor(String),

    #[error("product {owner}/{key} is not in the catalog")]
    UnknownProduct { owner: String, key: String },

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("failed to store artifact: {0}")]
    Publish(#[source] PublishError),

    #[error("failed to generate script: {0}")]
    Script(#[source] KubeError),
}

impl RequestError for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidQueryParam(_) => "INVALID_QUERY_PARAM",
            ApiError::InvalidPath(_) => "INVALID_PATH",
            ApiError::InvalidBody(_) => "INVALID_BODY",
            ApiError::UnknownFlavor(_) => "UNKNOWN_FLAVOR",
            ApiError::UnknownProduct { .. } => "UNKNOWN_PRODUCT",
            ApiError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            ApiError::Bundle(BundleError::Registry(e)) if e.is_not_found() => "CHART_NOT_FOUND",
            ApiError::Bundle(e) if e.is_input_error() => "INVALID_SELECTION",
            ApiError::Bundle(_) => "BUNDLE_ERROR",
            ApiError::Publish(_) => "PUBLISH_ERROR",
            ApiError::Script(_) => "SCRIPT_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidQueryParam(_) | ApiError::InvalidPath(_) | ApiError::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::UnknownFlavor(_) | ApiError::UnknownProduct { .. } | ApiError::OrderNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Bundle(BundleError::Registry(e)) if e.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Bundle(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            ApiError::Bundle(_) | ApiError::Publish(_) | ApiError::Script(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
