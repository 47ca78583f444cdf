//! Feature comparison table across bundles

use serde::{Deserialize, Serialize};

use crate::bundle::Feature;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTable {
    /// Column headers, one per bundle
    pub bundles: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "trait")]
    pub trait_name: String,
    /// `values[i]` belongs to `bundles[i]`
    pub values: Vec<String>,
}

impl FeatureTable {
    /// Tabulate per-bundle feature lists
    ///
    /// Rows appear in order of first appearance across the columns. A
    /// bundle that does not declare a trait gets an empty cell.
    pub fn from_columns(columns: Vec<(String, Vec<Feature>)>) -> Self {
        let width = columns.len();
        let mut table = FeatureTable {
            bundles: Vec::with_capacity(width),
            rows: Vec::new(),
        };

        for (col, (bundle, features)) in columns.into_iter().enumerate() {
            table.bundles.push(bundle);
            for feature in features {
                let row = match table
                    .rows
                    .iter()
                    .position(|r| r.trait_name == feature.trait_name)
                {
                    Some(idx) => &mut table.rows[idx],
                    None => {
                        table.rows.push(FeatureRow {
                            trait_name: feature.trait_name.clone(),
                            values: vec![String::new(); width],
                        });
                        let last = table.rows.len() - 1;
                        &mut table.rows[last]
                    }
                };
                row.values[col] = feature.value;
            }
        }

        table
    }
}
