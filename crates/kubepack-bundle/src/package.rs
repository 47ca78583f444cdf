//! Chart details for the values editor

use serde_json::Value as JsonValue;

use kubepack_core::view::ValuesFile;
use kubepack_core::{Chart, ChartRef, CoreError, PackageView};
use kubepack_repo::ChartRegistry;

use crate::error::Result;

/// Schema shipped for UI forms; takes precedence over `values.schema.json`
pub const OPENAPI_SCHEMA_FILE: &str = "values.openapiv3_schema.yaml";

/// Build the package view of a loaded chart
pub fn package_view(chart_ref: &ChartRef, chart: &Chart) -> Result<PackageView> {
    let mut values_files = Vec::new();
    for name in chart.values_files() {
        values_files.push(ValuesFile {
            name: name.to_string(),
            values: chart.values_file(name)?,
        });
    }
    values_files.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(PackageView {
        chart: chart_ref.with_version(&chart.metadata.version),
        metadata: chart.metadata.clone(),
        values: chart.values.clone(),
        values_files,
        openapiv3_schema: schema(chart)?,
    })
}

/// Fetch a chart and build its package view
pub async fn fetch_package_view<R: ChartRegistry + ?Sized>(
    registry: &R,
    chart_ref: &ChartRef,
) -> Result<PackageView> {
    let chart = registry.get_chart(chart_ref).await?;
    package_view(chart_ref, &chart)
}

fn schema(chart: &Chart) -> Result<Option<JsonValue>> {
    if let Some(file) = chart.file(OPENAPI_SCHEMA_FILE) {
        let schema: JsonValue = serde_yaml::from_slice(&file.data).map_err(CoreError::from)?;
        return Ok(Some(schema));
    }
    match &chart.schema {
        Some(data) => Ok(Some(serde_json::from_slice(data).map_err(CoreError::from)?)),
        None => Ok(None),
    }
}
