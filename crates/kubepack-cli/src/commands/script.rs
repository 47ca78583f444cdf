//! Script command - publish an install script for an order

use console::style;

use kubepack_core::Order;
use kubepack_kube::ScriptWriter;
use kubepack_publish::ScriptFlavor;

use crate::config::Settings;
use crate::display::print_script_refs;
use crate::error::Result;

pub async fn run(settings: &Settings, order: &Order, flavor: ScriptFlavor) -> Result<()> {
    let publisher = settings.require_publisher()?;
    let writer = ScriptWriter::new(settings.registry()?, publisher);
    let refs = writer.write(order, flavor).await?;

    println!(
        "{} Published {} script for order {}",
        style("✓").green().bold(),
        flavor,
        style(order.uid()).cyan()
    );
    print_script_refs(&refs);
    Ok(())
}
