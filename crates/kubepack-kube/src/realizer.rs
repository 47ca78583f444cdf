//! Order realization
//!
//! Selections are realized one after another in order; each walks the
//! steps of [`Step`]. Every step but [`Step::EmitApp`] is fatal: the first
//! failure stops the order and leaves earlier releases deployed. Nothing is
//! rolled back; callers clean up with [`Realizer::uninstall`].

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kubepack_core::application::{APPLICATION_API_VERSION, APPLICATION_KIND, ApplicationPackage};
use kubepack_core::{
    Capabilities, Chart, ChartSelection, HookEvent, Order, Release, ReleaseCoords, ReleaseInfo,
    ReleaseStatus,
};
use kubepack_engine::sort::sort_for_uninstall;
use kubepack_engine::{Document, Hook, RenderRequest, RenderResult, Renderer, parse_manifest};
use kubepack_publish::{Artifact, ArtifactPublisher};
use kubepack_repo::ChartRegistry;

use crate::application::ApplicationAggregator;
use crate::error::{KubeError, Result};
use crate::gateway::{CRD_KIND, ClusterGateway, ResourceMapping, object_name};
use crate::hooks::{HookRunner, hooks_from_records, record_runs};
use crate::resources::ResourceManager;
use crate::storage::StorageDriver;
use crate::wait::wait_for;

/// Timeouts and polling
#[derive(Debug, Clone, Copy)]
pub struct RealizeOptions {
    /// Bound on a release install or upgrade, hooks included
    pub release_timeout: Duration,
    /// Bound on a CRD becoming established
    pub crd_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RealizeOptions {
    fn default() -> Self {
        Self {
            release_timeout: Duration::from_secs(300),
            crd_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Per-selection install steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    EnsureNamespace,
    RenderChart,
    ApplyCrds,
    InstallRelease,
    WaitFor,
    CrdReady,
    EmitApp,
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::EnsureNamespace => "ensure-namespace",
            Step::RenderChart => "render-chart",
            Step::ApplyCrds => "apply-crds",
            Step::InstallRelease => "install-release",
            Step::WaitFor => "wait-for",
            Step::CrdReady => "crd-ready",
            Step::EmitApp => "emit-app",
            Step::Done => "done",
        };
        f.write_str(s)
    }
}

/// Outcome of one selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReleaseReport {
    pub release: String,
    pub namespace: String,
    pub revision: u32,
    pub status: ReleaseStatus,
    pub upgraded: bool,
    /// Public URL of the Application, when published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallReport {
    pub uid: Uuid,
    pub releases: Vec<ReleaseReport>,
    /// Non-fatal problems, such as a failed Application emission
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedRelease {
    pub release: String,
    pub namespace: String,
    /// Revisions deleted from the release store
    pub revisions: usize,
    /// Objects left in the cluster, with the reason
    pub kept: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UninstallReport {
    pub uid: Uuid,
    pub releases: Vec<RemovedRelease>,
    pub warnings: Vec<String>,
}

/// Realizes orders against a cluster
pub struct Realizer {
    registry: Arc<dyn ChartRegistry>,
    gateway: Arc<dyn ClusterGateway>,
    storage: Arc<dyn StorageDriver>,
    resources: ResourceManager,
    renderer: Renderer,
    aggregator: ApplicationAggregator,
    publisher: Option<ArtifactPublisher>,
    options: RealizeOptions,
}

impl Realizer {
    pub fn new(
        registry: Arc<dyn ChartRegistry>,
        gateway: Arc<dyn ClusterGateway>,
        storage: Arc<dyn StorageDriver>,
    ) -> Self {
        Self {
            registry,
            resources: ResourceManager::new(gateway.clone()),
            gateway,
            storage,
            renderer: Renderer::new(),
            aggregator: ApplicationAggregator::new(),
            publisher: None,
            options: RealizeOptions::default(),
        }
    }

    /// Also write each Application to the blob store
    pub fn with_publisher(mut self, publisher: ArtifactPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_aggregator(mut self, aggregator: ApplicationAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_options(mut self, options: RealizeOptions) -> Self {
        self.options = options;
        self
    }

    fn hook_runner(&self) -> HookRunner {
        HookRunner::new(
            self.resources.clone(),
            self.options.release_timeout,
            self.options.poll_interval,
        )
    }

    /// Install or upgrade every selection of `order`, in order
    pub async fn install(&self, order: &Order, cancel: &CancellationToken) -> Result<InstallReport> {
        let uid = order.uid();
        let capabilities = Capabilities::new(self.gateway.server_version().await?);
        tracing::info!(
            uid = %uid,
            selections = order.selections().len(),
            kube_version = %capabilities.kube_version.version,
            "realizing order"
        );

        let mut report = InstallReport {
            uid,
            releases: Vec::with_capacity(order.selections().len()),
            warnings: Vec::new(),
        };
        for selection in order.selections() {
            let realized = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(KubeError::Cancelled),
                realized = self.install_selection(order, selection, &capabilities, &mut report.warnings) => realized,
            };
            match realized {
                Ok(release) => report.releases.push(release),
                Err(e) => {
                    tracing::error!(
                        uid = %uid,
                        release = %selection.release_name,
                        namespace = %selection.namespace,
                        error = %e,
                        "order stopped"
                    );
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    async fn install_selection(
        &self,
        order: &Order,
        selection: &ChartSelection,
        capabilities: &Capabilities,
        warnings: &mut Vec<String>,
    ) -> Result<ReleaseReport> {
        let name = selection.release_name.as_str();
        let namespace = selection.namespace.as_str();
        let step = |step: Step| tracing::debug!(release = %name, namespace = %namespace, step = %step, "step");

        step(Step::EnsureNamespace);
        if self.gateway.ensure_namespace(namespace).await? {
            tracing::info!(namespace = %namespace, "created namespace");
        }

        step(Step::RenderChart);
        let chart = self.registry.get_chart(&selection.chart).await?;
        let latest = self.storage.last(namespace, name).await?;
        let revision = latest.as_ref().map_or(1, |r| r.version + 1);
        let previous = latest.filter(|r| r.info.status != ReleaseStatus::Uninstalled);
        let upgraded = previous.is_some();
        let coords = match previous {
            Some(_) => ReleaseCoords::for_upgrade(name, namespace, revision),
            None => ReleaseCoords {
                revision,
                ..ReleaseCoords::for_install(name, namespace)
            },
        };
        let mut request = RenderRequest::for_selection(selection)
            .with_release(coords)
            .with_capabilities(capabilities.clone());
        if let Some(constraint) = &order.spec.kube_version {
            request = request.with_kube_version_constraint(constraint);
        }
        let rendered = self.renderer.render(&chart, &request)?;
        warnings.extend(
            rendered
                .warnings
                .iter()
                .map(|w| format!("{name}: {w}")),
        );

        step(Step::ApplyCrds);
        self.apply_crds(&rendered).await?;

        step(Step::InstallRelease);
        let release = self
            .install_release(selection, &chart, &rendered, previous, revision)
            .await?;

        step(Step::WaitFor);
        for flags in &selection.wait_fors {
            wait_for(self.gateway.as_ref(), flags, namespace, self.options.poll_interval).await?;
        }

        step(Step::CrdReady);
        for crd in selection.owned_crds() {
            self.gateway
                .wait_crd_established(&crd, self.options.crd_timeout, self.options.poll_interval)
                .await?;
        }

        step(Step::EmitApp);
        let application_url = match self.emit_application(order.uid(), selection, &release).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(release = %name, namespace = %namespace, error = %e, "application not emitted");
                warnings.push(format!("{namespace}/{name}: application not emitted: {e}"));
                None
            }
        };

        step(Step::Done);
        tracing::info!(
            release = %name,
            namespace = %namespace,
            revision = release.version,
            chart = %selection.chart.name,
            version = %selection.chart.version,
            "release deployed"
        );
        Ok(ReleaseReport {
            release: release.name,
            namespace: release.namespace,
            revision: release.version,
            status: release.info.status,
            upgraded,
            application_url,
        })
    }

    async fn apply_crds(&self, rendered: &RenderResult) -> Result<()> {
        let mapping = ResourceMapping::crds();
        for doc in rendered.crd_documents()? {
            for crd in doc.objects() {
                let crd_name = object_name(crd).to_string();
                let crd_error = |e: KubeError| KubeError::CrdApply {
                    name: crd_name.clone(),
                    message: e.to_string(),
                };
                self.gateway.apply(&mapping, crd).await.map_err(crd_error)?;
                self.gateway
                    .wait_crd_established(&crd_name, self.options.crd_timeout, self.options.poll_interval)
                    .await
                    .map_err(crd_error)?;
                tracing::debug!(crd = %crd_name, "CRD established");
            }
        }
        Ok(())
    }

    /// Helm install/upgrade: record pending, run hooks and apply, record the outcome
    async fn install_release(
        &self,
        selection: &ChartSelection,
        chart: &Chart,
        rendered: &RenderResult,
        previous: Option<Release>,
        revision: u32,
    ) -> Result<Release> {
        let namespace = selection.namespace.as_str();
        let upgrade = previous.is_some();
        let now = Utc::now();

        let mut release = Release {
            name: selection.release_name.clone(),
            info: ReleaseInfo {
                first_deployed: previous
                    .as_ref()
                    .and_then(|p| p.info.first_deployed)
                    .or(Some(now)),
                last_deployed: Some(now),
                deleted: None,
                description: if upgrade { "Preparing upgrade" } else { "Initial install underway" }
                    .to_string(),
                status: if upgrade {
                    ReleaseStatus::PendingUpgrade
                } else {
                    ReleaseStatus::PendingInstall
                },
                notes: rendered.notes.clone().unwrap_or_default(),
            },
            chart: chart.clone(),
            config: rendered.values.diff(&chart.values).into_inner(),
            manifest: rendered.manifest(),
            hooks: rendered.hook_records(),
            version: revision,
            namespace: namespace.to_string(),
        };
        self.storage.create(&release).await?;

        let (pre, post) = if upgrade {
            (HookEvent::PreUpgrade, HookEvent::PostUpgrade)
        } else {
            (HookEvent::PreInstall, HookEvent::PostInstall)
        };
        let hooks: Vec<&Hook> = rendered.hooks.iter().collect();
        let manifests: Vec<&Document> = rendered.manifests.iter().collect();
        let runner = self.hook_runner();
        let work = async {
            let mut runs = runner.run(pre, &hooks, namespace).await?;
            self.resources.apply_documents(&manifests, namespace).await?;
            if let Some(previous) = &previous {
                let old = parse_manifest(&previous.manifest)?;
                let pruned = self.resources.prune(&old, &manifests, namespace).await?;
                if !pruned.deleted.is_empty() {
                    tracing::info!(release = %release.name, summary = %pruned.summary(), "pruned resources");
                }
            }
            runs.extend(runner.run(post, &hooks, namespace).await?);
            Ok::<_, KubeError>(runs)
        };

        let outcome = match tokio::time::timeout(self.options.release_timeout, work).await {
            Ok(Ok(runs)) => Ok(runs),
            Ok(Err(e)) => Err(KubeError::Helm {
                release: release.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(KubeError::Timeout {
                what: format!("release {namespace}/{}", release.name),
                after: self.options.release_timeout,
            }),
        };

        let runs = match outcome {
            Ok(runs) => runs,
            Err(e) => {
                release.info.status = ReleaseStatus::Failed;
                release.info.description = format!("Release \"{}\" failed: {e}", release.name);
                if let Err(store_error) = self.storage.update(&release).await {
                    tracing::error!(release = %release.name, error = %store_error, "failed to record release failure");
                }
                return Err(e);
            }
        };

        if let Some(mut previous) = previous {
            previous.info.status = ReleaseStatus::Superseded;
            previous.info.description = "Superseded".to_string();
            self.storage.update(&previous).await?;
        }
        record_runs(&mut release.hooks, &runs);
        release.info.status = ReleaseStatus::Deployed;
        release.info.description = if upgrade { "Upgrade complete" } else { "Install complete" }.to_string();
        self.storage.update(&release).await?;
        Ok(release)
    }

    /// Apply the release's Application and publish it; returns the public URL
    async fn emit_application(
        &self,
        uid: Uuid,
        selection: &ChartSelection,
        release: &Release,
    ) -> Result<Option<String>> {
        let package = ApplicationPackage {
            bundle: selection.parent_bundle().cloned(),
            chart: selection.chart.clone(),
            channel: String::new(),
        };
        let app = self.aggregator.aggregate(release, Some(package)).await?;

        let mapping = self
            .gateway
            .resolve_kind(APPLICATION_API_VERSION, APPLICATION_KIND)
            .await?;
        self.gateway.apply(&mapping, &serde_json::to_value(&app)?).await?;

        let Some(publisher) = &self.publisher else {
            return Ok(None);
        };
        let artifact = Artifact::Application {
            namespace: &release.namespace,
            name: &release.name,
        };
        let url = publisher
            .put_artifact(uid, artifact, serde_yaml::to_string(&app)?)
            .await?;
        Ok(Some(url))
    }

    /// Remove every release of `order`, last selection first
    ///
    /// CustomResourceDefinitions stay in the cluster, as do objects marked
    /// with the keep resource policy. Selections without a release are
    /// reported as warnings.
    pub async fn uninstall(&self, order: &Order, cancel: &CancellationToken) -> Result<UninstallReport> {
        let mut report = UninstallReport {
            uid: order.uid(),
            releases: Vec::new(),
            warnings: Vec::new(),
        };
        for selection in order.selections().iter().rev() {
            let removed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(KubeError::Cancelled),
                removed = self.uninstall_selection(selection, &mut report.warnings) => removed,
            };
            if let Some(removed) = removed? {
                report.releases.push(removed);
            }
        }
        Ok(report)
    }

    async fn uninstall_selection(
        &self,
        selection: &ChartSelection,
        warnings: &mut Vec<String>,
    ) -> Result<Option<RemovedRelease>> {
        let name = selection.release_name.as_str();
        let namespace = selection.namespace.as_str();

        let Some(mut latest) = self.storage.last(namespace, name).await? else {
            warnings.push(format!("{namespace}/{name}: release not found"));
            return Ok(None);
        };
        latest.info.status = ReleaseStatus::Uninstalling;
        latest.info.description = "Deletion in progress".to_string();
        self.storage.update(&latest).await?;

        let hooks = hooks_from_records(&latest.hooks)?;
        let hooks: Vec<&Hook> = hooks.iter().collect();
        let runner = self.hook_runner();
        runner.run(HookEvent::PreDelete, &hooks, namespace).await?;

        let mut docs = parse_manifest(&latest.manifest)?;
        sort_for_uninstall(&mut docs);
        let (crds, docs): (Vec<&Document>, Vec<&Document>) =
            docs.iter().partition(|d| d.kind() == CRD_KIND);
        let summary = self.resources.delete_documents(&docs, namespace).await?;

        runner.run(HookEvent::PostDelete, &hooks, namespace).await?;

        let revisions = self.storage.delete_all(namespace, name).await?.len();

        match self
            .gateway
            .resolve_kind(APPLICATION_API_VERSION, APPLICATION_KIND)
            .await
        {
            Ok(mapping) => {
                if let Err(e) = self.gateway.delete(&mapping, Some(namespace), name).await {
                    warnings.push(format!("{namespace}/{name}: application not deleted: {e}"));
                }
            }
            Err(KubeError::UnknownResource { .. }) => {}
            Err(e) => warnings.push(format!("{namespace}/{name}: application not deleted: {e}")),
        }

        let mut kept: Vec<String> = summary
            .skipped
            .iter()
            .map(|(key, reason)| format!("{key} ({reason})"))
            .collect();
        kept.extend(
            crds.iter()
                .map(|d| format!("{CRD_KIND}/{} (CRDs are not removed)", d.name())),
        );

        tracing::info!(
            release = %name,
            namespace = %namespace,
            revisions,
            deleted = summary.deleted.len(),
            kept = kept.len(),
            "release uninstalled"
        );
        Ok(Some(RemovedRelease {
            release: name.to_string(),
            namespace: namespace.to_string(),
            revisions,
            kept,
        }))
    }
}
