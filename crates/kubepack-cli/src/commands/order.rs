//! Order command - reduce an edited bundle view to an order

use console::style;
use std::path::Path;

use kubepack_bundle::OrderBuilder;
use kubepack_core::BundleView;

use crate::config::Settings;
use crate::error::{CliError, Result};

pub async fn run(
    settings: &Settings,
    view_path: &Path,
    license_key: Option<&str>,
    kube_version: Option<&str>,
    publish: bool,
) -> Result<()> {
    let data = std::fs::read_to_string(view_path).map_err(|e| CliError::Input {
        message: format!("cannot read bundle view {}: {e}", view_path.display()),
        help: Some("print one with `kubepack view --url <repo> --name <bundle>`".to_string()),
    })?;
    let view: BundleView = serde_yaml::from_str(&data)?;

    let mut builder = OrderBuilder::new();
    if let Some(key) = license_key {
        builder = builder.license_key(key);
    }
    if let Some(constraint) = kube_version {
        builder = builder.kube_version(constraint);
    }
    let order = builder.build(&view)?;

    if publish {
        let publisher = settings.require_publisher()?;
        let url = publisher.put_order(&order).await?;
        eprintln!(
            "{} Stored order {} ({} chart(s))",
            style("✓").green().bold(),
            style(order.uid()).cyan(),
            order.selections().len()
        );
        println!("{url}");
        return Ok(());
    }

    print!("{}", order.to_yaml()?);
    Ok(())
}
