//! HTTP API
//!
//! | Route | Response |
//! |---|---|
//! | `GET /bundleview?url=&name=&version=` | BundleView |
//! | `GET /packageview?url=&name=&version=` | PackageView |
//! | `POST /deploy/orders` (BundleView) | 201, Order |
//! | `GET /deploy/orders/:uid/:flavor` | `{linux, darwin}` script URLs |
//! | `GET /products/:owner/:key/compare` | FeatureTable |

use axum::Router;
use axum::routing::{get, post};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use kubepack_publish::ArtifactPublisher;
use kubepack_repo::ChartRegistry;

use crate::config::Product;

mod error;
mod handlers;


/// Shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn ChartRegistry>,
    pub publisher: ArtifactPublisher,
    /// owner -> key -> product
    pub products: Arc<IndexMap<String, IndexMap<String, Product>>>,
    /// Written at `licenseKeyPath` in every created order
    pub license_key: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bundleview", get(handlers::bundle_view))
        .route("/packageview", get(handlers::package_view))
        .route("/deploy/orders", post(handlers::create_order))
        .route("/deploy/orders/:uid/:flavor", get(handlers::order_script))
        .route("/products/:owner/:key/compare", get(handlers::compare_products))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests
pub async fn serve(listener: TcpListener, state: AppState, cancel: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
