//! Package command - show a chart's metadata, values and schema

use kubepack_bundle::fetch_package_view;
use kubepack_core::ChartRef;

use crate::config::Settings;
use crate::display::{OutputFormat, emit};
use crate::error::Result;

pub async fn run(settings: &Settings, chart: &ChartRef, output: OutputFormat) -> Result<()> {
    let registry = settings.registry()?;
    let view = fetch_package_view(&registry, chart).await?;
    emit(&view, output)
}
