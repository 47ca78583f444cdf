//! BundleView: the expanded, user-editable tree of a bundle

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::application::{ContactData, ImageSpec, Link};
use crate::bundle::{BundleOption, Feature, VersionDetail};
use crate::chart::{ChartMetadata, ChartRef};
use crate::error::CoreError;

/// Expanded bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleView {
    /// The bundle chart itself
    pub chart: ChartRef,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<ImageSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<ContactData>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,

    /// Nesting depth; 0 for the root bundle
    #[serde(default)]
    pub depth: u32,

    #[serde(default)]
    pub packages: Vec<PackageCard>,
}

impl BundleView {
    /// Visit every chart card in depth-first order
    pub fn chart_cards(&self) -> Vec<&ChartCard> {
        let mut out = Vec::new();
        collect_cards(self, &mut out);
        out
    }

    /// Mutable access to a chart card by chart name, searching depth-first
    pub fn chart_card_mut(&mut self, name: &str) -> Option<&mut ChartCard> {
        for package in &mut self.packages {
            let found = match package {
                PackageCard::Chart(card) if card.name == name => return Some(card),
                PackageCard::Chart(_) => None,
                PackageCard::Bundle(view) => view.chart_card_mut(name),
                PackageCard::OneOf(one_of) => one_of
                    .alternatives
                    .iter_mut()
                    .find_map(|alt| alt.view.chart_card_mut(name)),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

fn collect_cards<'a>(view: &'a BundleView, out: &mut Vec<&'a ChartCard>) {
    for package in &view.packages {
        match package {
            PackageCard::Chart(card) => out.push(card),
            PackageCard::Bundle(inner) => collect_cards(inner, out),
            PackageCard::OneOf(one_of) => {
                for alt in &one_of.alternatives {
                    collect_cards(&alt.view, out);
                }
            }
        }
    }
}

/// A node in the view; exactly one variant is set on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPackageCard", into = "RawPackageCard")]
pub enum PackageCard {
    Chart(ChartCard),
    Bundle(BundleView),
    OneOf(OneOfCard),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackageCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chart: Option<ChartCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bundle: Option<BundleView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    one_of: Option<OneOfCard>,
}

impl TryFrom<RawPackageCard> for PackageCard {
    type Error = CoreError;

    fn try_from(raw: RawPackageCard) -> Result<Self, Self::Error> {
        match (raw.chart, raw.bundle, raw.one_of) {
            (Some(chart), None, None) => Ok(Self::Chart(chart)),
            (None, Some(bundle), None) => Ok(Self::Bundle(bundle)),
            (None, None, Some(one_of)) => Ok(Self::OneOf(one_of)),
            _ => Err(CoreError::InvalidPackage {
                message: "package card must set exactly one of chart, bundle, oneOf".to_string(),
            }),
        }
    }
}

impl From<PackageCard> for RawPackageCard {
    fn from(card: PackageCard) -> Self {
        let mut raw = RawPackageCard {
            chart: None,
            bundle: None,
            one_of: None,
        };
        match card {
            PackageCard::Chart(c) => raw.chart = Some(c),
            PackageCard::Bundle(b) => raw.bundle = Some(b),
            PackageCard::OneOf(o) => raw.one_of = Some(o),
        }
        raw
    }
}

/// A chart with its selectable versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartCard {
    pub url: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icons: Vec<ImageSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,

    /// Target namespace; falls back to the bundle namespace
    #[serde(default)]
    pub namespace: String,

    pub versions: Vec<VersionDetail>,

    #[serde(default)]
    pub multi_select: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key_path: Option<String>,
}

impl ChartCard {
    pub fn chart_ref(&self, version: &str) -> ChartRef {
        ChartRef::new(&self.url, &self.name, version)
    }

    /// Mark exactly one version as selected
    pub fn select(&mut self, version: &str) -> bool {
        let mut found = false;
        for v in &mut self.versions {
            v.option.selected = v.option.version == version;
            found |= v.option.selected;
        }
        found
    }
}

/// Alternation among bundles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneOfCard {
    #[serde(default)]
    pub description: String,
    pub alternatives: Vec<BundleAlternative>,
}

impl OneOfCard {
    /// Select the alternative with the given bundle name, deselecting the others
    pub fn select(&mut self, name: &str) -> bool {
        let mut found = false;
        for alt in &mut self.alternatives {
            alt.selected = alt.bundle.name == name;
            found |= alt.selected;
        }
        found
    }
}

/// One branch of a `oneOf`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleAlternative {
    #[serde(flatten)]
    pub bundle: BundleOption,

    #[serde(default)]
    pub selected: bool,

    pub view: BundleView,
}

/// Everything a UI needs to configure a single chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageView {
    pub chart: ChartRef,
    pub metadata: ChartMetadata,

    /// Default values
    pub values: JsonValue,

    /// Alternative values files, by file name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<ValuesFile>,

    /// OpenAPI v3 schema of the values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapiv3_schema: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuesFile {
    pub name: String,
    pub values: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::VersionOption;

    fn card(name: &str, versions: &[&str]) -> ChartCard {
        ChartCard {
            url: "https://charts.appscode.com/stable/".to_string(),
            name: name.to_string(),
            versions: versions
                .iter()
                .map(|v| VersionDetail {
                    option: VersionOption {
                        version: v.to_string(),
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_chart_cards_depth_first() {
        let view = BundleView {
            packages: vec![
                PackageCard::Chart(card("a", &["v1"])),
                PackageCard::Bundle(BundleView {
                    depth: 1,
                    packages: vec![PackageCard::Chart(card("b", &["v1"]))],
                    ..Default::default()
                }),
                PackageCard::Chart(card("c", &["v1"])),
            ],
            ..Default::default()
        };

        let names: Vec<_> = view.chart_cards().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_select_version() {
        let mut view = BundleView {
            packages: vec![PackageCard::Chart(card("stash", &["v1", "v2"]))],
            ..Default::default()
        };

        let card = view.chart_card_mut("stash").unwrap();
        assert!(card.select("v2"));
        assert!(!card.versions[0].option.selected);
        assert!(card.versions[1].option.selected);
        assert!(!card.select("v3"));
    }

    #[test]
    fn test_view_round_trip() {
        let view = BundleView {
            chart: ChartRef::new("https://bundles.kubepack.com", "root", "v1"),
            packages: vec![PackageCard::OneOf(OneOfCard {
                description: "edition".to_string(),
                alternatives: vec![BundleAlternative {
                    bundle: BundleOption {
                        url: "https://bundles.kubepack.com".to_string(),
                        name: "community".to_string(),
                        version: "v1".to_string(),
                    },
                    selected: true,
                    view: BundleView::default(),
                }],
            })],
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&view).unwrap();
        let back: BundleView = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, view);
    }
}
