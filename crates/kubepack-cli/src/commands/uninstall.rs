//! Uninstall command - remove an order's releases, last first

use console::style;
use tokio_util::sync::CancellationToken;

use kubepack_core::Order;
use kubepack_kube::Realizer;

use crate::commands::connect;
use crate::config::Settings;
use crate::display::print_uninstall_report;
use crate::error::Result;

pub async fn run(settings: &Settings, order: &Order, cancel: &CancellationToken) -> Result<()> {
    println!(
        "{} Uninstalling order {}",
        style("→").blue().bold(),
        style(order.uid()).cyan()
    );

    let (gateway, storage) = connect(settings).await?;
    let realizer = Realizer::new(settings.registry()?, gateway, storage);
    let report = realizer.uninstall(order, cancel).await?;

    print_uninstall_report(&report);
    Ok(())
}
