//! Chart rendering pipeline
//!
//! [`Renderer::render`] turns a chart, a values baseline and patch, and
//! release coordinates into ordered hooks, manifests and CRDs:
//!
//! 1. reject non-application charts and incompatible `kubeVersion`s
//! 2. compute effective values (baseline, JSON Patch, coalesce into defaults)
//! 3. render the chart and every enabled subchart
//! 4. split into documents, partition hooks, sort by install order

use serde_json::Value as JsonValue;

use kubepack_core::{
    Capabilities, Chart, ChartSelection, HookEvent, HookRecord, ReleaseCoords, TemplateContext,
    Values,
};

use crate::engine::{JinjaEngine, TemplateEngine};
use crate::error::{EngineError, Result};
use crate::hooks::{Hook, sort_hooks};
use crate::manifest::{self, Document, split_documents};
use crate::sort::sort_for_install;

/// Subcharts nested deeper than this are not rendered
const MAX_SUBCHART_DEPTH: usize = 10;

/// Inputs of a render besides the chart
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub release: ReleaseCoords,

    /// Chart file replacing `values.yaml` as the baseline
    pub values_file: Option<String>,

    pub values_patch: Option<json_patch::Patch>,

    pub capabilities: Capabilities,

    /// Extra constraint on the cluster version, checked with the chart's own
    pub kube_version_constraint: Option<String>,
}

impl RenderRequest {
    /// A first install of `name` into `namespace`
    pub fn install(name: &str, namespace: &str) -> Self {
        Self {
            release: ReleaseCoords::for_install(name, namespace),
            values_file: None,
            values_patch: None,
            capabilities: Capabilities::default(),
            kube_version_constraint: None,
        }
    }

    /// Request for an order selection
    pub fn for_selection(selection: &ChartSelection) -> Self {
        Self {
            values_file: selection.values_file.clone(),
            values_patch: selection.values_patch.clone(),
            ..Self::install(&selection.release_name, &selection.namespace)
        }
    }

    pub fn with_release(mut self, release: ReleaseCoords) -> Self {
        self.release = release;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_values_patch(mut self, patch: json_patch::Patch) -> Self {
        self.values_patch = Some(patch);
        self
    }

    pub fn with_kube_version_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.kube_version_constraint = Some(constraint.into());
        self
    }
}

/// A CRD file shipped in a chart's `crds/` directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdFile {
    /// Chart-qualified path, e.g. `cert-manager/crds/certificates.yaml`
    pub name: String,
    pub data: String,
}

impl CrdFile {
    pub fn documents(&self) -> Result<Vec<Document>> {
        split_documents(&self.name, &self.data)
    }
}

/// Output of a render
#[derive(Debug, Clone)]
pub struct RenderResult {
    /// The effective values the templates saw
    pub values: Values,

    /// Hooks sorted by weight, test hooks removed unless requested
    pub hooks: Vec<Hook>,

    /// Non-hook documents in install order
    pub manifests: Vec<Document>,

    pub crds: Vec<CrdFile>,

    /// Rendered `NOTES.txt` of the top-level chart
    pub notes: Option<String>,

    pub warnings: Vec<String>,
}

impl RenderResult {
    /// Release manifest: the non-hook documents with `# Source:` headers
    pub fn manifest(&self) -> String {
        manifest::join_manifest(
            self.manifests
                .iter()
                .map(|d| (d.source.as_str(), d.content.as_str())),
        )
    }

    /// Hooks bound to `event`, in execution order
    pub fn hooks_for(&self, event: HookEvent) -> Vec<&Hook> {
        self.hooks.iter().filter(|h| h.has_event(event)).collect()
    }

    pub fn hook_records(&self) -> Vec<HookRecord> {
        self.hooks.iter().map(Hook::to_record).collect()
    }

    /// Pre-install hooks, then manifests, then post-install hooks
    pub fn install_stream(&self) -> Vec<&Document> {
        let pre = self.hooks_for(HookEvent::PreInstall);
        let post = self.hooks_for(HookEvent::PostInstall);
        pre.into_iter()
            .map(|h| &h.document)
            .chain(self.manifests.iter())
            .chain(post.into_iter().map(|h| &h.document))
            .collect()
    }

    /// Parsed documents of every CRD file
    pub fn crd_documents(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for crd in &self.crds {
            docs.extend(crd.documents()?);
        }
        Ok(docs)
    }
}

/// Effective values for a chart
///
/// The baseline is `values_file` when named, otherwise the chart defaults.
/// The patch applies to the baseline and the result is coalesced into the
/// chart defaults, so a `null` removes a default key.
pub fn effective_values(
    chart: &Chart,
    values_file: Option<&str>,
    values_patch: Option<&json_patch::Patch>,
) -> Result<Values> {
    let baseline: JsonValue = match values_file {
        Some(name) => chart.values_file(name)?,
        None => chart.values.clone(),
    };
    let mut values = Values::from(baseline);
    if let Some(patch) = values_patch {
        values.apply_patch(patch)?;
    }
    Ok(values.coalesce(&chart.values))
}

/// Renders charts for install
pub struct Renderer<E = JinjaEngine> {
    engine: E,
    include_tests: bool,
}

impl Default for Renderer<JinjaEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer<JinjaEngine> {
    pub fn new() -> Self {
        Self::with_engine(JinjaEngine::new())
    }
}

impl<E: TemplateEngine> Renderer<E> {
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            include_tests: false,
        }
    }

    /// Keep `test` hooks in the output
    pub fn include_tests(mut self, include: bool) -> Self {
        self.include_tests = include;
        self
    }

    pub fn render(&self, chart: &Chart, request: &RenderRequest) -> Result<RenderResult> {
        if !chart.is_installable() {
            return Err(EngineError::NotInstallable {
                chart: chart.name().to_string(),
                chart_type: chart.metadata.chart_type.clone().unwrap_or_default(),
            });
        }

        let kube_version = &request.capabilities.kube_version;
        let constraints = chart
            .metadata
            .kube_version
            .iter()
            .chain(request.kube_version_constraint.iter())
            .filter(|c| !c.trim().is_empty());
        for constraint in constraints {
            if !kube_version.satisfies(constraint)? {
                return Err(EngineError::IncompatibleKubeVersion {
                    chart: chart.name().to_string(),
                    constraint: constraint.clone(),
                    kube_version: kube_version.version.clone(),
                });
            }
        }

        let values = effective_values(
            chart,
            request.values_file.as_deref(),
            request.values_patch.as_ref(),
        )?;

        let mut warnings = Vec::new();
        if chart.metadata.deprecated {
            let warning = format!("chart {} is deprecated", chart.name());
            tracing::warn!(chart = %chart.name(), "{warning}");
            warnings.push(warning);
        }

        let mut output = TreeOutput {
            warnings,
            ..Default::default()
        };
        self.render_tree(chart, &values, request, chart.name(), 0, &mut output)?;

        let mut hooks = Vec::new();
        let mut manifests = Vec::new();
        for document in output.documents {
            match Hook::try_from(document) {
                Ok(hook) if hook.is_test() && !self.include_tests => {}
                Ok(hook) => hooks.push(hook),
                Err(document) => manifests.push(document),
            }
        }
        sort_for_install(&mut manifests);
        sort_hooks(&mut hooks);
        let crds = output.crds;

        tracing::debug!(
            chart = %chart.name(),
            release = %request.release.name,
            manifests = manifests.len(),
            hooks = hooks.len(),
            crds = crds.len(),
            "rendered chart"
        );

        Ok(RenderResult {
            values,
            hooks,
            manifests,
            crds,
            notes: output.notes,
            warnings: output.warnings,
        })
    }

    /// Render `chart` and its enabled subcharts into `output`
    ///
    /// `path` is the chart-qualified prefix of every document source,
    /// e.g. `kubedb/charts/kubedb-catalog`.
    fn render_tree(
        &self,
        chart: &Chart,
        values: &Values,
        request: &RenderRequest,
        path: &str,
        depth: usize,
        output: &mut TreeOutput,
    ) -> Result<()> {
        if depth > MAX_SUBCHART_DEPTH {
            output.warnings.push(format!(
                "subcharts of {path} nested deeper than {MAX_SUBCHART_DEPTH} were not rendered"
            ));
            return Ok(());
        }

        for dependency in &chart.metadata.dependencies {
            if !dependency.is_enabled(values.inner()) {
                tracing::debug!(chart = %chart.name(), dependency = %dependency.name, "dependency disabled");
                continue;
            }
            let subchart = chart.subchart(dependency).ok_or_else(|| {
                EngineError::DependencyUnresolved {
                    chart: chart.name().to_string(),
                    dependency: dependency.effective_name().to_string(),
                }
            })?;
            let scoped =
                Values::for_subchart(&subchart.values, values, dependency.effective_name());
            let sub_path = format!("{path}/charts/{}", dependency.effective_name());
            self.render_tree(subchart, &scoped, request, &sub_path, depth + 1, output)?;
        }

        for crd in chart.crd_files() {
            output.crds.push(CrdFile {
                name: format!("{path}/{}", crd.name),
                data: crd.text(),
            });
        }

        // Library charts only contribute helpers
        if !chart.is_installable() {
            return Ok(());
        }

        let context = TemplateContext::new(values.clone(), request.release.clone(), &chart.metadata)
            .with_capabilities(request.capabilities.clone());
        for template in self.engine.render_chart(chart, &context)? {
            let source = format!("{path}/{}", template.name);
            if template.name.ends_with("NOTES.txt") {
                if depth == 0 {
                    output.notes = Some(template.content);
                }
                continue;
            }
            output.documents.extend(split_documents(&source, &template.content)?);
        }

        Ok(())
    }
}

#[derive(Default)]
struct TreeOutput {
    documents: Vec<Document>,
    crds: Vec<CrdFile>,
    notes: Option<String>,
    warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubepack_core::{ChartDependency, ChartFile, ChartMetadata, KubeVersion};
    use serde_json::json;

    fn patch(ops: JsonValue) -> json_patch::Patch {
        serde_json::from_value(ops).unwrap()
    }

    fn metadata(name: &str) -> ChartMetadata {
        ChartMetadata {
            api_version: "v2".to_string(),
            name: name.to_string(),
            version: "v0.9.0".to_string(),
            app_version: Some("v0.9.0".to_string()),
            ..Default::default()
        }
    }

    fn stash() -> Chart {
        Chart {
            metadata: metadata("stash"),
            values: json!({
                "replicaCount": 1,
                "license": {"key": ""},
                "monitoring": {"enabled": false}
            }),
            templates: vec![
                ChartFile::new(
                    "templates/deployment.yaml",
                    "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ release.name }}\nspec:\n  replicas: {{ values.replicaCount }}\n",
                ),
                ChartFile::new(
                    "templates/license.yaml",
                    "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {{ release.name }}-license\nstringData:\n  key: {{ values.license.key | quote }}\n",
                ),
                ChartFile::new(
                    "templates/sa.yaml",
                    "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: {{ release.name }}\n---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ release.namespace }}\n",
                ),
                ChartFile::new(
                    "templates/cleaner.yaml",
                    "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: cleaner\n  annotations:\n    helm.sh/hook: pre-delete\n",
                ),
                ChartFile::new(
                    "templates/setup.yaml",
                    "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: setup\n  annotations:\n    helm.sh/hook: pre-install\n",
                ),
                ChartFile::new(
                    "templates/tests/ping.yaml",
                    "apiVersion: v1\nkind: Pod\nmetadata:\n  name: ping\n  annotations:\n    helm.sh/hook: test\n",
                ),
                ChartFile::new("templates/NOTES.txt", "Installed {{ release.name }}\n"),
            ],
            files: vec![
                ChartFile::new(
                    "crds/repository.yaml",
                    "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: repositories.stash.appscode.com\n",
                ),
                ChartFile::new("values-ha.yaml", "replicaCount: 3\n"),
            ],
            ..Default::default()
        }
    }

    fn kinds(result: &RenderResult) -> Vec<&str> {
        result.manifests.iter().map(Document::kind).collect()
    }

    #[test]
    fn test_render_orders_and_partitions() {
        let result = Renderer::new()
            .render(&stash(), &RenderRequest::install("stash", "kube-system"))
            .unwrap();

        assert_eq!(kinds(&result), vec!["Namespace", "ServiceAccount", "Secret", "Deployment"]);
        assert_eq!(result.hooks.len(), 2);
        assert!(result.hooks.iter().all(|h| !h.is_test()));
        assert_eq!(result.notes.as_deref(), Some("Installed stash\n"));
        assert_eq!(result.crds.len(), 1);
        assert_eq!(result.crds[0].name, "stash/crds/repository.yaml");
        assert_eq!(result.crd_documents().unwrap()[0].name(), "repositories.stash.appscode.com");

        let stream: Vec<_> = result.install_stream().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(stream.first().map(String::as_str), Some("setup"));
        assert!(!stream.contains(&"cleaner".to_string()));

        assert!(result.manifest().contains("# Source: stash/templates/deployment.yaml\n"));
    }

    #[test]
    fn test_include_tests() {
        let result = Renderer::new()
            .include_tests(true)
            .render(&stash(), &RenderRequest::install("stash", "kube-system"))
            .unwrap();
        assert!(result.hooks.iter().any(Hook::is_test));
    }

    #[test]
    fn test_license_patch_reaches_manifest() {
        let request = RenderRequest::install("stash", "kube-system").with_values_patch(patch(json!([
            {"op": "replace", "path": "/license/key", "value": "L"}
        ])));
        let result = Renderer::new().render(&stash(), &request).unwrap();

        assert_eq!(result.values.get("license.key"), Some(&json!("L")));
        let secret = result.manifests.iter().find(|d| d.kind() == "Secret").unwrap();
        assert_eq!(secret.object.pointer("/stringData/key"), Some(&json!("L")));
    }

    #[test]
    fn test_values_file_baseline() {
        let values = effective_values(&stash(), Some("values-ha.yaml"), None).unwrap();
        assert_eq!(values.get("replicaCount"), Some(&json!(3)));
        // defaults fill keys the baseline omits
        assert_eq!(values.get("monitoring.enabled"), Some(&json!(false)));

        assert!(effective_values(&stash(), Some("values-missing.yaml"), None).is_err());
    }

    #[test]
    fn test_render_is_deterministic() {
        let request = RenderRequest::install("stash", "kube-system");
        let a = Renderer::new().render(&stash(), &request).unwrap();
        let b = Renderer::new().render(&stash(), &request).unwrap();
        assert_eq!(a.manifest(), b.manifest());
        assert_eq!(a.hook_records(), b.hook_records());
    }

    #[test]
    fn test_incompatible_kube_version() {
        let mut chart = stash();
        chart.metadata.kube_version = Some(">= 1.16.0".to_string());

        let old = RenderRequest::install("stash", "kube-system")
            .with_capabilities(Capabilities::new(KubeVersion::parse("v1.14.10").unwrap()));
        assert!(matches!(
            Renderer::new().render(&chart, &old),
            Err(EngineError::IncompatibleKubeVersion { .. })
        ));

        // order-level constraints apply too
        let capped = RenderRequest::install("stash", "kube-system").with_kube_version_constraint("< 1.20");
        assert!(matches!(
            Renderer::new().render(&chart, &capped),
            Err(EngineError::IncompatibleKubeVersion { .. })
        ));
    }

    #[test]
    fn test_library_chart_rejected() {
        let mut chart = stash();
        chart.metadata.chart_type = Some("library".to_string());
        assert!(matches!(
            Renderer::new().render(&chart, &RenderRequest::install("stash", "default")),
            Err(EngineError::NotInstallable { .. })
        ));
    }

    #[test]
    fn test_deprecated_warns() {
        let mut chart = stash();
        chart.metadata.deprecated = true;
        let result = Renderer::new()
            .render(&chart, &RenderRequest::install("stash", "default"))
            .unwrap();
        assert_eq!(result.warnings, vec!["chart stash is deprecated"]);
    }

    fn parent_with_sub(condition: Option<&str>) -> Chart {
        let mut sub = Chart {
            metadata: metadata("catalog"),
            values: json!({"image": "catalog:v1"}),
            templates: vec![ChartFile::new(
                "templates/cm.yaml",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: catalog\ndata:\n  image: {{ values.image }}\n  region: {{ values.global.region }}\n",
            )],
            ..Default::default()
        };
        sub.metadata.name = "kubedb-catalog".to_string();

        let mut parent = Chart {
            metadata: metadata("kubedb"),
            values: json!({
                "global": {"region": "eu"},
                "catalog": {"enabled": true, "image": "catalog:v2"}
            }),
            dependencies: vec![sub],
            ..Default::default()
        };
        parent.metadata.dependencies = vec![ChartDependency {
            name: "kubedb-catalog".to_string(),
            alias: Some("catalog".to_string()),
            condition: condition.map(str::to_string),
            ..Default::default()
        }];
        parent
    }

    #[test]
    fn test_subchart_scoped_values() {
        let result = Renderer::new()
            .render(&parent_with_sub(Some("catalog.enabled")), &RenderRequest::install("kubedb", "kubedb"))
            .unwrap();

        let cm = &result.manifests[0];
        assert_eq!(cm.source, "kubedb/charts/catalog/templates/cm.yaml");
        assert_eq!(cm.object.pointer("/data/image"), Some(&json!("catalog:v2")));
        assert_eq!(cm.object.pointer("/data/region"), Some(&json!("eu")));
    }

    #[test]
    fn test_disabled_subchart_skipped() {
        let request = RenderRequest::install("kubedb", "kubedb").with_values_patch(patch(json!([
            {"op": "replace", "path": "/catalog/enabled", "value": false}
        ])));
        let result = Renderer::new()
            .render(&parent_with_sub(Some("catalog.enabled")), &request)
            .unwrap();
        assert!(result.manifests.is_empty());
    }

    #[test]
    fn test_unresolved_dependency() {
        let mut chart = parent_with_sub(None);
        chart.dependencies.clear();
        let err = Renderer::new()
            .render(&chart, &RenderRequest::install("kubedb", "kubedb"))
            .unwrap_err();
        assert!(matches!(err, EngineError::DependencyUnresolved { ref dependency, .. } if dependency == "catalog"));
    }
}
