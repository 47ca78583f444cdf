//! `kubepack.com/v1alpha1` Bundle document
//!
//! A bundle is a chart whose rendered output contains exactly one `Bundle`
//! document. Its `spec.packages` lists charts, nested bundles and `oneOf`
//! alternations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::application::{ContactData, ImageSpec, Link};
use crate::chart::ChartRef;
use crate::error::CoreError;
use crate::wait::WaitFlags;

pub const BUNDLE_API_VERSION: &str = "kubepack.com/v1alpha1";
pub const BUNDLE_KIND: &str = "Bundle";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: BundleMeta,
    pub spec: BundleSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
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

    /// Default namespace for the bundle's charts
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<Feature>,

    #[serde(default)]
    pub packages: Vec<PackageRef>,
}

/// A `(trait, value)` pair advertised by a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "trait")]
    pub trait_name: String,
    #[serde(default)]
    pub value: String,
}

/// One entry of `spec.packages`; exactly one variant is set on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPackageRef", into = "RawPackageRef")]
pub enum PackageRef {
    Chart(ChartOption),
    Bundle(BundleOption),
    OneOf(OneOfBundleOption),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chart: Option<ChartOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bundle: Option<BundleOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    one_of: Option<OneOfBundleOption>,
}

impl TryFrom<RawPackageRef> for PackageRef {
    type Error = CoreError;

    fn try_from(raw: RawPackageRef) -> Result<Self, Self::Error> {
        match (raw.chart, raw.bundle, raw.one_of) {
            (Some(chart), None, None) => Ok(Self::Chart(chart)),
            (None, Some(bundle), None) => Ok(Self::Bundle(bundle)),
            (None, None, Some(one_of)) => Ok(Self::OneOf(one_of)),
            (None, None, None) => Err(CoreError::InvalidPackage {
                message: "package sets none of chart, bundle, oneOf".to_string(),
            }),
            _ => Err(CoreError::InvalidPackage {
                message: "package sets more than one of chart, bundle, oneOf".to_string(),
            }),
        }
    }
}

impl From<PackageRef> for RawPackageRef {
    fn from(package: PackageRef) -> Self {
        let mut raw = RawPackageRef {
            chart: None,
            bundle: None,
            one_of: None,
        };
        match package {
            PackageRef::Chart(c) => raw.chart = Some(c),
            PackageRef::Bundle(b) => raw.bundle = Some(b),
            PackageRef::OneOf(o) => raw.one_of = Some(o),
        }
        raw
    }
}

/// A concrete chart with one or more installable versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartOption {
    pub url: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub versions: Vec<VersionDetail>,

    #[serde(default)]
    pub multi_select: bool,

    #[serde(default)]
    pub required: bool,

    /// JSON Pointer into the values where the license key goes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key_path: Option<String>,
}

impl ChartOption {
    pub fn chart_ref(&self, version: &str) -> ChartRef {
        ChartRef::new(&self.url, &self.name, version)
    }
}

/// One installable version of a chart option
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetail {
    #[serde(flatten)]
    pub option: VersionOption,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDefinitions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_fors: Vec<WaitFlags>,
}

/// Version entry as edited by users
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOption {
    pub version: String,

    #[serde(default)]
    pub selected: bool,

    /// File inside the chart replacing `values.yaml` as the baseline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_patch: Option<json_patch::Patch>,
}

/// CRDs owned or required by a chart version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinitions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned: Vec<ResourceId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<ResourceId>,
}

/// A custom resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub group: String,
    pub version: String,
    /// Plural resource name
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ResourceId {
    /// Name of the CustomResourceDefinition object (`<plural>.<group>`)
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.name, self.group)
    }
}

/// Reference to a nested bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleOption {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl BundleOption {
    pub fn chart_ref(&self) -> ChartRef {
        ChartRef::new(&self.url, &self.name, &self.version)
    }
}

/// Alternation among bundles; users pick exactly one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneOfBundleOption {
    #[serde(default)]
    pub description: String,
    pub bundles: Vec<BundleOption>,
}
