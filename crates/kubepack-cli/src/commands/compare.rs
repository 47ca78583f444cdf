//! Compare command - tabulate bundle features

use kubepack_bundle::BundleResolver;

use crate::config::Settings;
use crate::display::{OutputFormat, emit, format_feature_table};
use crate::error::{CliError, Result};

/// Which bundles to compare
pub enum Target {
    Bundles {
        url: String,
        bundles: Vec<String>,
        version: String,
    },
    /// `owner/key` from the product catalog
    Product(String),
}

pub async fn run(settings: &Settings, target: Target, output: Option<OutputFormat>) -> Result<()> {
    let (url, bundles, version) = match target {
        Target::Bundles { url, bundles, version } => (url, bundles, version),
        Target::Product(id) => {
            let (owner, key) = id.split_once('/').ok_or_else(|| CliError::Input {
                message: format!("invalid product '{id}'"),
                help: Some("products are named owner/key, e.g. appscode/kubedb".to_string()),
            })?;
            let product = settings.product(owner, key).ok_or_else(|| CliError::Input {
                message: format!("product {id} is not in the catalog"),
                help: Some("add it under `products` in the configuration file".to_string()),
            })?;
            (product.repo_url.clone(), product.bundles.clone(), product.version.clone())
        }
    };

    let resolver = BundleResolver::new(settings.registry()?);
    let table = resolver.compare(&url, &bundles, &version).await?;
    match output {
        Some(format) => emit(&table, format),
        None => {
            print!("{}", format_feature_table(&table));
            Ok(())
        }
    }
}
