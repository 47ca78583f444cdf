//! kubepack bundles
//!
//! Turns bundle charts into something installable:
//!
//! - [`BundleResolver::resolve`] expands a bundle tree into a [`BundleView`]
//! - [`OrderBuilder::build`] reduces an edited view to an [`Order`]
//! - [`BundleResolver::compare`] tabulates features across bundles
//! - [`package_view`] describes one chart for the values editor
//!
//! [`BundleView`]: kubepack_core::BundleView
//! [`Order`]: kubepack_core::Order

pub mod builder;
pub mod error;
pub mod features;
pub mod package;
pub mod resolver;

pub use builder::OrderBuilder;
pub use error::{BundleError, Result};
pub use package::{fetch_package_view, package_view};
pub use resolver::{BundleNode, BundleResolver, DEFAULT_NAMESPACE, NodeId, extract_bundle};
