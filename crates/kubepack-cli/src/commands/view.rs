//! View command - expand a bundle chart

use console::style;

use kubepack_bundle::BundleResolver;
use kubepack_core::ChartRef;

use crate::config::Settings;
use crate::display::{OutputFormat, emit};
use crate::error::Result;

pub async fn run(settings: &Settings, chart: &ChartRef, output: OutputFormat) -> Result<()> {
    eprintln!("{} Resolving bundle {}", style("→").blue().bold(), style(chart).cyan());

    let resolver = BundleResolver::new(settings.registry()?);
    let view = resolver.resolve(chart).await?;
    emit(&view, output)
}
