//! Bundle tree expansion
//!
//! [`BundleResolver::resolve`] walks a bundle depth-first and produces the
//! [`BundleView`] users edit before ordering. Bundles are fetched once per
//! resolver and kept in an arena keyed by `(url, name, version)`; the
//! resolution stack holds arena ids, so cycle checks compare integers.

use futures::future::{BoxFuture, try_join_all};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kubepack_core::bundle::{BUNDLE_API_VERSION, BUNDLE_KIND};
use kubepack_core::{
    Bundle, BundleAlternative, BundleView, Chart, ChartCard, ChartMetadata, ChartOption, ChartRef,
    CoreError, ImageSpec, OneOfBundleOption, OneOfCard, PackageCard, PackageRef,
};
use kubepack_engine::{RenderRequest, Renderer};
use kubepack_repo::ChartRegistry;

use crate::error::{BundleError, Result};

/// Namespace used when neither the chart option nor its bundle names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Find the single `Bundle` document a bundle chart renders
pub fn extract_bundle(renderer: &Renderer, chart: &Chart) -> Result<Bundle> {
    let rendered = renderer.render(chart, &RenderRequest::install(chart.name(), DEFAULT_NAMESPACE))?;
    let mut bundles: Vec<Bundle> = rendered
        .manifests
        .iter()
        .filter(|d| d.api_version() == BUNDLE_API_VERSION && d.kind() == BUNDLE_KIND)
        .map(|d| serde_json::from_value(d.object.clone()).map_err(CoreError::from))
        .collect::<std::result::Result<_, _>>()?;

    match bundles.len() {
        0 => Err(BundleError::NotABundle {
            chart: chart.name().to_string(),
        }),
        1 => Ok(bundles.remove(0)),
        count => Err(BundleError::AmbiguousBundle {
            chart: chart.name().to_string(),
            count,
        }),
    }
}

/// Index of a bundle in the resolver arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A fetched bundle chart
#[derive(Debug)]
pub struct BundleNode {
    /// Reference with the resolved version
    pub chart: ChartRef,
    pub metadata: ChartMetadata,
    pub bundle: Bundle,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Arc<BundleNode>>,
    index: HashMap<ChartRef, NodeId>,
}

impl Arena {
    fn lookup(&self, chart: &ChartRef) -> Option<(NodeId, Arc<BundleNode>)> {
        let id = *self.index.get(chart)?;
        Some((id, self.nodes[id.0].clone()))
    }

    /// Insert a node, reusing the existing id when the resolved ref is known
    fn insert(&mut self, requested: &ChartRef, node: BundleNode) -> (NodeId, Arc<BundleNode>) {
        if let Some((id, existing)) = self.lookup(&node.chart) {
            self.index.insert(requested.clone(), id);
            return (id, existing);
        }
        let id = NodeId(self.nodes.len());
        let node = Arc::new(node);
        self.index.insert(requested.clone(), id);
        self.index.insert(node.chart.clone(), id);
        self.nodes.push(node.clone());
        (id, node)
    }
}

/// Expands bundles into views
pub struct BundleResolver<R> {
    registry: R,
    renderer: Renderer,
    arena: Mutex<Arena>,
}

impl<R: ChartRegistry> BundleResolver<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            renderer: Renderer::new(),
            arena: Mutex::new(Arena::default()),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Expand the bundle at `root` into a view
    pub async fn resolve(&self, root: &ChartRef) -> Result<BundleView> {
        let mut stack = Vec::new();
        let view = self.resolve_node(root, 0, &mut stack).await?;
        tracing::debug!(bundle = %root, charts = view.chart_cards().len(), "resolved bundle");
        Ok(view)
    }

    /// Fetch a bundle chart and its Bundle document, once per resolver
    pub async fn load(&self, chart: &ChartRef) -> Result<(NodeId, Arc<BundleNode>)> {
        if let Some(found) = self.lock_arena().lookup(chart) {
            return Ok(found);
        }

        let loaded = self.registry.get_chart(chart).await?;
        let bundle = extract_bundle(&self.renderer, &loaded)?;
        let node = BundleNode {
            chart: chart.with_version(&loaded.metadata.version),
            metadata: loaded.metadata,
            bundle,
        };
        Ok(self.lock_arena().insert(chart, node))
    }

    fn lock_arena(&self) -> std::sync::MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve_node<'a>(
        &'a self,
        chart: &'a ChartRef,
        depth: u32,
        stack: &'a mut Vec<(NodeId, ChartRef)>,
    ) -> BoxFuture<'a, Result<BundleView>> {
        Box::pin(async move {
            let (id, node) = self.load(chart).await?;
            if stack.iter().any(|(seen, _)| *seen == id) {
                let chain = stack
                    .iter()
                    .map(|(_, c)| c)
                    .chain(std::iter::once(&node.chart))
                    .map(|c| format!("{}@{}", c.name, c.version))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(BundleError::CycleDetected { chain });
            }
            stack.push((id, node.chart.clone()));

            let spec = &node.bundle.spec;
            let mut view = BundleView {
                chart: node.chart.clone(),
                display_name: if spec.display_name.is_empty() {
                    node.metadata.name.clone()
                } else {
                    spec.display_name.clone()
                },
                description: if spec.description.is_empty() {
                    node.metadata.description.clone().unwrap_or_default()
                } else {
                    spec.description.clone()
                },
                icons: spec.icons.clone(),
                maintainers: spec.maintainers.clone(),
                links: spec.links.clone(),
                namespace: spec.namespace.clone(),
                features: spec.features.clone(),
                depth,
                packages: Vec::with_capacity(spec.packages.len()),
            };

            for package in &spec.packages {
                let card = match package {
                    PackageRef::Chart(option) => {
                        PackageCard::Chart(self.chart_card(option, &spec.namespace, depth).await?)
                    }
                    PackageRef::Bundle(option) => {
                        let nested = option.chart_ref();
                        PackageCard::Bundle(self.resolve_node(&nested, depth + 1, stack).await?)
                    }
                    PackageRef::OneOf(one_of) => {
                        PackageCard::OneOf(self.one_of_card(one_of, depth, stack).await?)
                    }
                };
                view.packages.push(card);
            }

            stack.pop();
            Ok(view)
        })
    }

    async fn one_of_card(
        &self,
        one_of: &OneOfBundleOption,
        depth: u32,
        stack: &mut Vec<(NodeId, ChartRef)>,
    ) -> Result<OneOfCard> {
        let mut alternatives = Vec::with_capacity(one_of.bundles.len());
        for option in &one_of.bundles {
            let nested = option.chart_ref();
            let view = self.resolve_node(&nested, depth + 1, stack).await?;
            alternatives.push(BundleAlternative {
                bundle: option.clone(),
                selected: false,
                view,
            });
        }
        Ok(OneOfCard {
            description: one_of.description.clone(),
            alternatives,
        })
    }

    async fn chart_card(
        &self,
        option: &ChartOption,
        bundle_namespace: &str,
        depth: u32,
    ) -> Result<ChartCard> {
        // Every listed version must exist; the first one describes the card
        let refs: Vec<ChartRef> = option
            .versions
            .iter()
            .map(|v| option.chart_ref(&v.option.version))
            .collect();
        let charts = try_join_all(refs.iter().map(|r| self.registry.get_chart(r))).await?;
        let metadata = charts.first().map(|c| &c.metadata);

        let namespace = option
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| Some(bundle_namespace.to_string()).filter(|ns| !ns.is_empty()))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let mut versions = option.versions.clone();
        if versions.len() == 1 && !versions[0].option.selected {
            versions[0].option.selected = true;
        }

        Ok(ChartCard {
            url: option.url.clone(),
            name: option.name.clone(),
            description: metadata
                .and_then(|m| m.description.clone())
                .unwrap_or_default(),
            icons: metadata
                .and_then(|m| m.icon.clone())
                .map(|src| ImageSpec {
                    src,
                    ..Default::default()
                })
                .into_iter()
                .collect(),
            features: option.features.clone(),
            namespace,
            versions,
            multi_select: option.multi_select,
            // Nested bundles only install what the user picks
            required: option.required && depth == 0,
            license_key_path: option.license_key_path.clone(),
        })
    }
}
