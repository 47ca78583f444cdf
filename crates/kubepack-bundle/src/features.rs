//! Feature comparison across bundles

use futures::future::try_join_all;

use kubepack_core::{ChartRef, FeatureTable};
use kubepack_repo::ChartRegistry;

use crate::error::Result;
use crate::resolver::BundleResolver;

impl<R: ChartRegistry> BundleResolver<R> {
    /// Tabulate the features of several bundles from one repository
    ///
    /// Columns follow `bundle_names`; rows appear in order of first
    /// appearance and missing traits are empty cells.
    pub async fn compare(
        &self,
        repo_url: &str,
        bundle_names: &[String],
        version: &str,
    ) -> Result<FeatureTable> {
        let loads = bundle_names
            .iter()
            .map(|name| ChartRef::new(repo_url, name, version))
            .map(|chart| async move { self.load(&chart).await });
        let nodes = try_join_all(loads).await?;

        let columns = bundle_names
            .iter()
            .zip(nodes)
            .map(|(name, (_, node))| (name.clone(), node.bundle.spec.features.clone()))
            .collect();
        Ok(FeatureTable::from_columns(columns))
    }
}
