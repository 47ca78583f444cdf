//! CLI commands

use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use kubepack_core::Order;
use kubepack_kube::{ClusterGateway, KubeGateway, StorageDriver};

use crate::config::Settings;
use crate::error::{CliError, Result};

pub mod view;
pub mod package;
pub mod order;
pub mod compare;

// cluster commands
pub mod install;
pub mod uninstall;
pub mod audit;

// blob store commands
pub mod script;
pub mod serve;

/// Where an order comes from
#[derive(Debug, Clone)]
pub enum OrderSource {
    File(PathBuf),
    /// `<uid>/order.yaml` in the blob store
    Stored(Uuid),
}

pub async fn load_order(settings: &Settings, source: OrderSource) -> Result<Order> {
    match source {
        OrderSource::File(path) => {
            let yaml = std::fs::read_to_string(&path).map_err(|e| CliError::Input {
                message: format!("cannot read order {}: {e}", path.display()),
                help: Some("create one with `kubepack order <view.yaml>`".to_string()),
            })?;
            Ok(Order::from_yaml(&yaml)?)
        }
        OrderSource::Stored(uid) => Ok(settings.require_publisher()?.get_order(uid).await?),
    }
}

/// Connect to the current kubeconfig context
pub async fn connect(settings: &Settings) -> Result<(Arc<dyn ClusterGateway>, Arc<dyn StorageDriver>)> {
    let gateway: Arc<dyn ClusterGateway> = Arc::new(KubeGateway::try_default().await?);
    let storage = settings.storage_driver.build(gateway.clone());
    tracing::debug!(driver = %settings.storage_driver, "connected to cluster");
    Ok((gateway, storage))
}
