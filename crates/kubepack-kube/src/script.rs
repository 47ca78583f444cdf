//! Install scripts for an order
//!
//! A script does what [`Realizer::install`](crate::Realizer::install) would,
//! as `/bin/sh` for someone holding the cluster credentials. Every artifact
//! the script refers to is published under the order's UID first; any
//! publication failure fails the whole script.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use kubepack_core::application::{APPLICATION_CRD_URL, ApplicationPackage};
use kubepack_core::{
    Capabilities, Chart, ChartSelection, KubeVersion, Order, Release, ReleaseCoords, ReleaseInfo,
    ReleaseStatus,
};
use kubepack_engine::{Document, RenderRequest, RenderResult, Renderer, join_manifest};
use kubepack_publish::{Artifact, ArtifactPublisher, ScriptFlavor};
use kubepack_repo::ChartRegistry;

use crate::application::ApplicationAggregator;
use crate::error::Result;
use crate::gateway::object_name;

/// Name of the Application CRD the scripts wait for
const APPLICATION_CRD_NAME: &str = "applications.app.k8s.io";

/// Public URLs of the script, per platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptRefs {
    pub linux: String,
    pub darwin: String,
}

/// Publishes install scripts
pub struct ScriptWriter {
    registry: Arc<dyn ChartRegistry>,
    publisher: ArtifactPublisher,
    renderer: Renderer,
    aggregator: ApplicationAggregator,
    capabilities: Capabilities,
    crd_timeout: Duration,
}

impl ScriptWriter {
    /// Renders against the default Kubernetes version
    pub fn new(registry: Arc<dyn ChartRegistry>, publisher: ArtifactPublisher) -> Self {
        Self {
            registry,
            publisher,
            renderer: Renderer::new(),
            aggregator: ApplicationAggregator::new(),
            capabilities: Capabilities::new(KubeVersion::default()),
            crd_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_kube_version(mut self, version: KubeVersion) -> Self {
        self.capabilities = Capabilities::new(version);
        self
    }

    pub fn with_aggregator(mut self, aggregator: ApplicationAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Render `order`, publish its artifacts and the script
    pub async fn write(&self, order: &Order, flavor: ScriptFlavor) -> Result<ScriptRefs> {
        let uid = order.uid();
        let mut script = Script::new();
        script.wait_crd(APPLICATION_CRD_URL, APPLICATION_CRD_NAME, self.crd_timeout);

        for selection in order.selections() {
            let chart = self.registry.get_chart(&selection.chart).await?;
            let rendered = self.render(order, selection, &chart)?;

            script.comment(&format!(
                "{}/{} ({} {})",
                selection.namespace, selection.release_name, selection.chart.name, selection.chart.version
            ));
            match flavor {
                ScriptFlavor::Helm3 => self.helm3_install(&mut script, selection, &chart, &rendered),
                ScriptFlavor::Yaml => {
                    self.yaml_install(&mut script, uid, selection, &rendered).await?;
                }
            }
            for flags in &selection.wait_fors {
                script.kubectl("wait", flags.kubectl_args(&selection.namespace));
            }
            for crd in selection.owned_crds() {
                script.wait_established(&crd, self.crd_timeout);
            }
            let app_url = self.publish_application(uid, selection, &chart, &rendered).await?;
            script.kubectl("apply", ["-f".to_string(), app_url]);
        }

        let url = self
            .publisher
            .put_artifact(uid, Artifact::Script(flavor), script.finish())
            .await?;
        tracing::info!(uid = %uid, flavor = %flavor, url = %url, "published script");
        Ok(ScriptRefs {
            linux: url.clone(),
            darwin: url,
        })
    }

    fn render(&self, order: &Order, selection: &ChartSelection, chart: &Chart) -> Result<RenderResult> {
        let mut request = RenderRequest::for_selection(selection)
            .with_release(ReleaseCoords::for_install(&selection.release_name, &selection.namespace))
            .with_capabilities(self.capabilities.clone());
        if let Some(constraint) = &order.spec.kube_version {
            request = request.with_kube_version_constraint(constraint);
        }
        Ok(self.renderer.render(chart, &request)?)
    }

    fn helm3_install(
        &self,
        script: &mut Script,
        selection: &ChartSelection,
        chart: &Chart,
        rendered: &RenderResult,
    ) {
        let repo = repo_name(&selection.chart.url);
        script.line(["helm", "repo", "add", repo.as_str(), selection.chart.url.as_str()]);
        script.line(["helm", "repo", "update"]);

        let chart_path = format!("{repo}/{}", selection.chart.name);
        let command: [&str; 10] = [
            "helm",
            "upgrade",
            "--install",
            &selection.release_name,
            &chart_path,
            "--namespace",
            &selection.namespace,
            "--create-namespace",
            "--version",
            &selection.chart.version,
        ];
        let mut args: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        for set in rendered.values.diff(&chart.values).to_set_args() {
            args.push("--set".to_string());
            args.push(set);
        }
        script.line(args);
    }

    /// CRDs one object per artifact, then the whole install stream as one
    async fn yaml_install(
        &self,
        script: &mut Script,
        uid: Uuid,
        selection: &ChartSelection,
        rendered: &RenderResult,
    ) -> Result<()> {
        for doc in rendered.crd_documents()? {
            for crd in doc.objects() {
                let name = object_name(crd);
                let url = self
                    .publisher
                    .put_artifact(uid, Artifact::Crd(name), serde_yaml::to_string(crd)?)
                    .await?;
                script.wait_crd(&url, name, self.crd_timeout);
            }
        }

        let namespace = &selection.namespace;
        script.raw(&format!(
            "kubectl create namespace {} --dry-run=client -o yaml | kubectl apply -f -",
            quote(namespace)
        ));

        let stream: Vec<&Document> = rendered.install_stream();
        let manifest = join_manifest(stream.iter().map(|d| (d.source.as_str(), d.content.as_str())));
        let url = self
            .publisher
            .put_artifact(uid, Artifact::Manifest(&selection.release_name), manifest)
            .await?;
        script.kubectl(
            "apply",
            ["-f".to_string(), url, format!("--namespace={namespace}")],
        );
        Ok(())
    }

    /// The Application a deployed release of this selection would carry
    async fn publish_application(
        &self,
        uid: Uuid,
        selection: &ChartSelection,
        chart: &Chart,
        rendered: &RenderResult,
    ) -> Result<String> {
        let release = Release {
            name: selection.release_name.clone(),
            info: ReleaseInfo {
                status: ReleaseStatus::Deployed,
                ..Default::default()
            },
            chart: chart.clone(),
            config: rendered.values.diff(&chart.values).into_inner(),
            manifest: rendered.manifest(),
            hooks: rendered.hook_records(),
            version: 1,
            namespace: selection.namespace.clone(),
        };
        let package = ApplicationPackage {
            bundle: selection.parent_bundle().cloned(),
            chart: selection.chart.clone(),
            channel: String::new(),
        };
        let app = self.aggregator.aggregate(&release, Some(package)).await?;
        let artifact = Artifact::Application {
            namespace: &release.namespace,
            name: &release.name,
        };
        Ok(self
            .publisher
            .put_artifact(uid, artifact, serde_yaml::to_string(&app)?)
            .await?)
    }
}

/// Script body under construction
struct Script {
    body: String,
}

impl Script {
    fn new() -> Self {
        Self {
            body: "#!/bin/sh\nset -eu\n".to_string(),
        }
    }

    fn comment(&mut self, text: &str) {
        self.body.push_str("\n# ");
        self.body.push_str(text);
        self.body.push('\n');
    }

    fn raw(&mut self, line: &str) {
        self.body.push_str(line);
        self.body.push('\n');
    }

    fn line<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: Vec<String> = words.into_iter().map(|w| quote(w.as_ref())).collect();
        self.raw(&words.join(" "));
    }

    fn kubectl<I>(&mut self, verb: &str, args: I)
    where
        I: IntoIterator<Item = String>,
    {
        let words = ["kubectl".to_string(), verb.to_string()]
            .into_iter()
            .chain(args);
        self.line(words);
    }

    fn wait_established(&mut self, crd: &str, timeout: Duration) {
        self.kubectl(
            "wait",
            [
                "--for=condition=Established".to_string(),
                format!("crd/{crd}"),
                format!("--timeout={}s", timeout.as_secs()),
            ],
        );
    }

    /// Apply a CRD from `url` and wait for it
    fn wait_crd(&mut self, url: &str, crd: &str, timeout: Duration) {
        self.kubectl("apply", ["-f".to_string(), url.to_string()]);
        self.wait_established(crd, timeout);
    }

    fn finish(self) -> String {
        self.body
    }
}

/// Quote a shell word unless it only holds safe characters
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '@' | '+' | '%')
        });
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Local Helm repository name for a chart repository URL
///
/// `https://charts.jetstack.io` becomes `charts-jetstack-io`; the path is
/// kept so two repositories on one host get different names.
pub fn repo_name(repo_url: &str) -> String {
    let trimmed = match url::Url::parse(repo_url) {
        Ok(url) => format!("{}{}", url.host_str().unwrap_or_default(), url.path()),
        Err(_) => repo_url.to_string(),
    };
    let mut name = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    name.trim_matches('-').to_string()
}
