//! Route handlers

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use uuid::Uuid;

use kubepack_bundle::{BundleResolver, OrderBuilder, fetch_package_view};
use kubepack_core::{BundleView, ChartRef, FeatureTable, Order, PackageView};
use kubepack_kube::{ScriptRefs, ScriptWriter};
use kubepack_publish::{PublishError, ScriptFlavor};

use super::AppState;
use super::error::{ApiError, BoxRequestError};

/// Handler for `GET /bundleview?url=<repo>&name=<chart>&version=<v>`
#[tracing::instrument(skip_all, err)]
pub async fn bundle_view(
    State(state): State<AppState>,
    query: Result<Query<ChartRef>, QueryRejection>,
) -> Result<Json<BundleView>, BoxRequestError> {
    let Query(chart) = query.map_err(ApiError::InvalidQueryParam)?;
    let resolver = BundleResolver::new(state.registry.clone());
    let view = resolver.resolve(&chart).await.map_err(ApiError::from)?;
    Ok(Json(view))
}

/// Handler for `GET /packageview?url=<repo>&name=<chart>&version=<v>`
#[tracing::instrument(skip_all, err)]
pub async fn package_view(
    State(state): State<AppState>,
    query: Result<Query<ChartRef>, QueryRejection>,
) -> Result<Json<PackageView>, BoxRequestError> {
    let Query(chart) = query.map_err(ApiError::InvalidQueryParam)?;
    let view = fetch_package_view(&state.registry, &chart)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(view))
}

/// Handler for `POST /deploy/orders`
///
/// Builds an order from the edited view and stores it as `<uid>/order.yaml`.
#[tracing::instrument(skip_all, err)]
pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<BundleView>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), BoxRequestError> {
    let Json(view) = body.map_err(ApiError::InvalidBody)?;
    let mut builder = OrderBuilder::new();
    if let Some(key) = &state.license_key {
        builder = builder.license_key(key.clone());
    }
    let order = builder.build(&view).map_err(ApiError::from)?;
    state
        .publisher
        .put_order(&order)
        .await
        .map_err(ApiError::Publish)?;
    tracing::info!(uid = %order.uid(), charts = order.selections().len(), "created order");
    Ok((StatusCode::CREATED, Json(order)))
}

/// Handler for `GET /deploy/orders/:uid/:flavor`
#[tracing::instrument(skip_all, err)]
pub async fn order_script(
    State(state): State<AppState>,
    path: Result<Path<(Uuid, String)>, PathRejection>,
) -> Result<Json<ScriptRefs>, BoxRequestError> {
    let Path((uid, flavor)) = path.map_err(ApiError::InvalidPath)?;
    let flavor = match flavor.as_str() {
        "helm3" => ScriptFlavor::Helm3,
        "yaml" => ScriptFlavor::Yaml,
        _ => return Err(ApiError::UnknownFlavor(flavor).into()),
    };

    let order = match state.publisher.get_order(uid).await {
        Ok(order) => order,
        Err(PublishError::NotFound { .. }) => return Err(ApiError::OrderNotFound(uid).into()),
        Err(e) => return Err(ApiError::Publish(e).into()),
    };

    let writer = ScriptWriter::new(state.registry.clone(), state.publisher.clone());
    let refs = writer.write(&order, flavor).await.map_err(ApiError::Script)?;
    Ok(Json(refs))
}

/// Handler for `GET /products/:owner/:key/compare`
#[tracing::instrument(skip_all, err)]
pub async fn compare_products(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<FeatureTable>, BoxRequestError> {
    let Path((owner, key)) = path.map_err(ApiError::InvalidPath)?;
    let Some(product) = state.products.get(&owner).and_then(|p| p.get(&key)) else {
        return Err(ApiError::UnknownProduct { owner, key }.into());
    };

    let resolver = BundleResolver::new(state.registry.clone());
    let table = resolver
        .compare(&product.repo_url, &product.bundles, &product.version)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(table))
}
