//! kubepack core - shared types for the bundle packaging and deployment toolkit
//!
//! This crate provides the data model used throughout kubepack:
//! - `Chart`: a loaded Helm chart (metadata, values, templates, files, subcharts)
//! - `Values`: configuration values with Helm coalescing and JSON Patch support
//! - `Bundle` / `BundleView`: a catalog of charts and its user-editable expansion
//! - `Order`: a flat, submitted selection of charts ready to realize
//! - `Release`: the Helm release record, wire-compatible with stock Helm
//! - `Application`: the aggregate object summarizing a release's components

pub mod application;
pub mod archive;
pub mod bundle;
pub mod chart;
pub mod context;
pub mod error;
pub mod features;
pub mod order;
pub mod release;
pub mod values;
pub mod view;
pub mod wait;

pub use application::{Application, AssemblyPhase, ContactData, GroupKind, ImageSpec, Link};
pub use bundle::{
    Bundle, BundleOption, BundleSpec, ChartOption, Feature, OneOfBundleOption, PackageRef,
    ResourceDefinitions, ResourceId, VersionDetail, VersionOption,
};
pub use chart::{Chart, ChartDependency, ChartFile, ChartMetadata, ChartRef, Maintainer};
pub use context::{Capabilities, KubeVersion, ReleaseCoords, TemplateContext};
pub use error::{CoreError, Result};
pub use features::{FeatureRow, FeatureTable};
pub use order::{ChartSelection, Order, validate_release_name};
pub use release::{HookDeletePolicy, HookEvent, HookRecord, Release, ReleaseInfo, ReleaseStatus};
pub use values::Values;
pub use view::{BundleAlternative, BundleView, ChartCard, OneOfCard, PackageCard, PackageView};
pub use wait::{GroupResource, UNBOUNDED_WAIT, WaitCondition, WaitFlags};

/// JSON Patch (RFC 6902) type used for values overlays
pub use json_patch::Patch as ValuesPatch;
