//! Reduce an edited BundleView to an Order
//!
//! Cards are visited depth-first in `packages` order, so the Order lists
//! charts in the sequence the bundles declare them.

use std::collections::HashSet;

use kubepack_core::{
    BundleView, ChartCard, ChartRef, ChartSelection, OneOfCard, Order, PackageCard, ValuesPatch,
    VersionDetail, validate_release_name,
};

use crate::error::{BundleError, Result};

/// Builds orders from views
#[derive(Debug, Clone, Default)]
pub struct OrderBuilder {
    license_key: Option<String>,
    kube_version: Option<String>,
}

impl OrderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value written at every card's `licenseKeyPath`
    pub fn license_key(mut self, key: impl Into<String>) -> Self {
        self.license_key = Some(key.into());
        self
    }

    /// Cluster version constraint recorded on the order
    pub fn kube_version(mut self, constraint: impl Into<String>) -> Self {
        self.kube_version = Some(constraint.into());
        self
    }

    pub fn build(&self, view: &BundleView) -> Result<Order> {
        let mut selections = Vec::new();
        let mut ancestry = Vec::new();
        self.walk(view, &mut ancestry, &mut selections)?;

        if selections.is_empty() {
            return Err(BundleError::InvalidSelection {
                chart: view.chart.name.clone(),
                message: "no chart version is selected".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for s in &selections {
            if !seen.insert((s.namespace.as_str(), s.release_name.as_str())) {
                return Err(BundleError::InvalidSelection {
                    chart: s.chart.name.clone(),
                    message: format!(
                        "release {}/{} is selected more than once",
                        s.namespace, s.release_name
                    ),
                });
            }
        }

        let mut order = Order::new(view.chart.name.clone(), selections);
        order.spec.kube_version = self.kube_version.clone();
        tracing::debug!(
            uid = %order.uid(),
            selections = order.selections().len(),
            "built order"
        );
        Ok(order)
    }

    fn walk(
        &self,
        view: &BundleView,
        ancestry: &mut Vec<ChartRef>,
        out: &mut Vec<ChartSelection>,
    ) -> Result<()> {
        ancestry.push(view.chart.clone());
        for package in &view.packages {
            match package {
                PackageCard::Chart(card) => self.chart(card, view.depth, ancestry, out)?,
                PackageCard::Bundle(nested) => self.walk(nested, ancestry, out)?,
                PackageCard::OneOf(one_of) => self.one_of(one_of, ancestry, out)?,
            }
        }
        ancestry.pop();
        Ok(())
    }

    fn one_of(
        &self,
        card: &OneOfCard,
        ancestry: &mut Vec<ChartRef>,
        out: &mut Vec<ChartSelection>,
    ) -> Result<()> {
        let selected: Vec<_> = card.alternatives.iter().filter(|a| a.selected).collect();
        match selected.as_slice() {
            [alt] => self.walk(&alt.view, ancestry, out),
            [] => Err(BundleError::NoOneOfSelection {
                description: card.description.clone(),
                alternatives: card
                    .alternatives
                    .iter()
                    .map(|a| a.bundle.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            many => Err(BundleError::InvalidSelection {
                chart: many[0].bundle.name.clone(),
                message: format!(
                    "{} alternatives of '{}' are selected, expected one",
                    many.len(),
                    card.description
                ),
            }),
        }
    }

    fn chart(
        &self,
        card: &ChartCard,
        depth: u32,
        ancestry: &[ChartRef],
        out: &mut Vec<ChartSelection>,
    ) -> Result<()> {
        let required = card.required && depth == 0;
        let selected: Vec<&VersionDetail> =
            card.versions.iter().filter(|v| v.option.selected).collect();

        if selected.is_empty() {
            if required {
                return Err(BundleError::InvalidSelection {
                    chart: card.name.clone(),
                    message: "chart is required but no version is selected".to_string(),
                });
            }
            return Ok(());
        }
        if selected.len() > 1 && !card.multi_select {
            return Err(BundleError::InvalidSelection {
                chart: card.name.clone(),
                message: format!(
                    "{} versions selected but the chart is not multi-select",
                    selected.len()
                ),
            });
        }

        for version in selected {
            let release_name = if card.multi_select {
                format!("{}-{}", card.name, version.option.version)
            } else {
                card.name.clone()
            };
            validate_release_name(&release_name)?;

            out.push(ChartSelection {
                chart: card.chart_ref(&version.option.version),
                release_name,
                namespace: card.namespace.clone(),
                values_file: version.option.values_file.clone(),
                values_patch: self.values_patch(card, version)?,
                resources: version.resources.clone(),
                wait_fors: version.wait_fors.clone(),
                bundle_ancestry: ancestry.to_vec(),
            });
        }
        Ok(())
    }

    /// The card's patch, plus a `replace` of the license key when the chart asks for one
    fn values_patch(&self, card: &ChartCard, version: &VersionDetail) -> Result<Option<ValuesPatch>> {
        let mut patch = version.option.values_patch.clone();
        let Some(path) = card.license_key_path.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(patch);
        };

        let license: ValuesPatch = serde_json::from_value(serde_json::json!([{
            "op": "replace",
            "path": path,
            "value": self.license_key.clone().unwrap_or_default(),
        }]))
        .map_err(|e| BundleError::InvalidSelection {
            chart: card.name.clone(),
            message: format!("licenseKeyPath '{path}' is not a JSON pointer: {e}"),
        })?;

        match patch.as_mut() {
            Some(existing) => existing.0.extend(license.0),
            None => patch = Some(license),
        }
        Ok(patch)
    }
}
