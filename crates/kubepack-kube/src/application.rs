//! Application aggregation
//!
//! Builds the `app.k8s.io/v1beta1` Application summarizing a release: the
//! kinds it is made of, the labels all of its objects share, and a
//! descriptor taken from the chart metadata.

use std::collections::BTreeMap;
use std::time::Duration;

use kubepack_core::application::{
    ApplicationPackage, ApplicationSpec, COMPONENT_VERSIONS_ANNOTATION, Descriptor, LINK_SOURCE_REPO,
    LINK_WEBSITE, LabelSelector,
};
use kubepack_core::{Application, AssemblyPhase, ContactData, GroupKind, HookEvent, ImageSpec, Link, Release};
use kubepack_engine::manifest::{parse_manifest, split_api_version, split_documents};

use crate::error::Result;
use crate::gateway::object_labels;

/// Bytes read from an icon URL to detect its type
pub const SNIFF_LEN: usize = 512;

const SNIFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds Applications from releases
#[derive(Debug, Clone)]
pub struct ApplicationAggregator {
    /// `None` when icon types come from the URL extension only
    http: Option<reqwest::Client>,
}

impl Default for ApplicationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationAggregator {
    /// Aggregator that fetches icons to detect their MIME type
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(SNIFF_TIMEOUT)
            .user_agent(concat!("kubepack/", env!("CARGO_PKG_VERSION")))
            .build()
            .ok();
        Self { http }
    }

    /// Aggregator that never touches the network
    pub fn offline() -> Self {
        Self { http: None }
    }

    /// Build the Application for a release
    ///
    /// Components are the release manifest plus its pre- and post-install
    /// hooks; test hooks are left out.
    pub async fn aggregate(
        &self,
        release: &Release,
        package: Option<ApplicationPackage>,
    ) -> Result<Application> {
        let mut docs = parse_manifest(&release.manifest)?;
        for hook in &release.hooks {
            let installs = hook
                .events
                .iter()
                .any(|e| matches!(e, HookEvent::PreInstall | HookEvent::PostInstall));
            if installs && !hook.events.contains(&HookEvent::Test) {
                docs.extend(split_documents(&hook.path, &hook.manifest)?);
            }
        }

        // kind -> apiVersion of its first occurrence
        let mut kinds: BTreeMap<GroupKind, String> = BTreeMap::new();
        let mut shared_labels: Option<BTreeMap<String, String>> = None;
        for object in docs.iter().flat_map(|d| d.objects()) {
            let api_version = object
                .get("apiVersion")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            let kind = object
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            let (group, version) = split_api_version(api_version);
            kinds
                .entry(GroupKind::new(group, kind))
                .or_insert_with(|| version.to_string());

            let labels = object_labels(object);
            shared_labels = Some(match shared_labels {
                None => labels,
                Some(mut shared) => {
                    shared.retain(|k, v| labels.get(k) == Some(v));
                    shared
                }
            });
        }

        let versions: Vec<&str> = kinds.values().map(String::as_str).collect();
        let spec = ApplicationSpec {
            descriptor: self.descriptor(release).await,
            component_group_kinds: kinds.keys().cloned().collect(),
            selector: LabelSelector {
                match_labels: shared_labels.unwrap_or_default(),
            },
            add_owner_ref: false,
            assembly_phase: AssemblyPhase::from(release.info.status),
            package,
        };

        let mut app = Application::new(&release.name, &release.namespace, spec);
        if !versions.is_empty() {
            app.metadata
                .annotations
                .insert(COMPONENT_VERSIONS_ANNOTATION.to_string(), versions.join(","));
        }
        tracing::debug!(
            release = %release.name,
            namespace = %release.namespace,
            kinds = kinds.len(),
            "aggregated application"
        );
        Ok(app)
    }

    async fn descriptor(&self, release: &Release) -> Descriptor {
        let meta = &release.chart.metadata;

        let mut icons = Vec::new();
        if let Some(src) = meta.icon.as_deref().filter(|s| !s.is_empty()) {
            icons.push(ImageSpec {
                src: src.to_string(),
                size: None,
                mime_type: self.icon_type(src).await,
            });
        }

        let mut links = Vec::new();
        if let Some(home) = meta.home.as_deref().filter(|s| !s.is_empty()) {
            links.push(Link {
                description: LINK_WEBSITE.to_string(),
                url: home.to_string(),
            });
        }
        links.extend(meta.sources.iter().map(|url| Link {
            description: LINK_SOURCE_REPO.to_string(),
            url: url.clone(),
        }));

        Descriptor {
            app_type: meta.name.clone(),
            version: meta.app_version.clone().unwrap_or_default(),
            description: meta.description.clone().unwrap_or_default(),
            icons,
            maintainers: meta
                .maintainers
                .iter()
                .map(|m| ContactData {
                    name: m.name.clone(),
                    url: m.url.clone(),
                    email: m.email.clone(),
                })
                .collect(),
            keywords: meta.keywords.clone(),
            links,
            notes: release.info.notes.clone(),
        }
    }

    /// MIME type of an icon: sniffed when online, else from the extension
    async fn icon_type(&self, url: &str) -> Option<String> {
        if let Some(http) = &self.http {
            match fetch_head_bytes(http, url).await {
                Ok(bytes) => {
                    if let Some(mime) = sniff_image(&bytes) {
                        return Some(mime.to_string());
                    }
                }
                Err(e) => tracing::debug!(url = %url, error = %e, "icon fetch failed"),
            }
        }
        mime_from_extension(url).map(str::to_string)
    }
}

async fn fetch_head_bytes(http: &reqwest::Client, url: &str) -> reqwest::Result<Vec<u8>> {
    let mut response = http
        .get(url)
        .header(reqwest::header::RANGE, format!("bytes=0-{}", SNIFF_LEN - 1))
        .send()
        .await?
        .error_for_status()?;
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    while buf.len() < SNIFF_LEN {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(SNIFF_LEN);
    Ok(buf)
}

/// Detect an image type from its leading bytes
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some("image/x-icon");
    }
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg")) {
        return Some("image/svg+xml");
    }
    None
}

/// Guess an image type from the URL path
pub fn mime_from_extension(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "ico" => Some("image/x-icon"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubepack_core::{Chart, ChartMetadata, HookRecord, Maintainer, ReleaseInfo, ReleaseStatus};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANIFEST: &str = "---
# Source: cert-manager/templates/sa.yaml
apiVersion: v1
kind: ServiceAccount
metadata:
  name: cert-manager
  labels:
    app: cert-manager
    release: cert-manager
    component: controller
---
# Source: cert-manager/templates/deployment.yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: cert-manager
  labels:
    app: cert-manager
    release: cert-manager
    component: webhook
";

    fn release(icon: Option<String>) -> Release {
        let hook = |name: &str, event: HookEvent| HookRecord {
            name: name.to_string(),
            kind: "Job".to_string(),
            path: "cert-manager/templates/job.yaml".to_string(),
            manifest: format!(
                "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: {name}\n  labels:\n    app: cert-manager\n    release: cert-manager\n"
            ),
            events: vec![event],
            last_run: Default::default(),
            weight: 0,
            delete_policies: vec![],
        };
        Release {
            name: "cert-manager".to_string(),
            info: ReleaseInfo {
                status: ReleaseStatus::Deployed,
                notes: "cert-manager has been deployed".to_string(),
                ..Default::default()
            },
            chart: Chart {
                metadata: ChartMetadata {
                    name: "cert-manager".to_string(),
                    version: "v0.13.1".to_string(),
                    app_version: Some("v0.13.1".to_string()),
                    home: Some("https://github.com/jetstack/cert-manager".to_string()),
                    sources: vec!["https://github.com/jetstack/cert-manager".to_string()],
                    keywords: vec!["tls".to_string()],
                    icon,
                    maintainers: vec![Maintainer {
                        name: "munnerz".to_string(),
                        email: Some("james@jetstack.io".to_string()),
                        url: None,
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            config: serde_json::json!({}),
            manifest: MANIFEST.to_string(),
            hooks: vec![
                hook("cert-manager-startupapicheck", HookEvent::PostInstall),
                hook("cert-manager-test", HookEvent::Test),
            ],
            version: 1,
            namespace: "cert-manager".to_string(),
        }
    }

    #[tokio::test]
    async fn test_aggregate_components_and_selector() {
        let app = ApplicationAggregator::offline()
            .aggregate(&release(None), None)
            .await
            .unwrap();

        let kinds: Vec<String> = app
            .spec
            .component_group_kinds
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(kinds, vec!["ServiceAccount.", "Deployment.apps", "Job.batch"]);
        assert_eq!(app.metadata.annotations[COMPONENT_VERSIONS_ANNOTATION], "v1,v1,v1");

        let labels = &app.spec.selector.match_labels;
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["app"], "cert-manager");
        assert!(!labels.contains_key("component"));

        assert_eq!(app.spec.assembly_phase, AssemblyPhase::Succeeded);
        assert_eq!(app.spec.descriptor.app_type, "cert-manager");
        assert_eq!(app.spec.descriptor.version, "v0.13.1");
        assert_eq!(app.spec.descriptor.links[0].description, LINK_WEBSITE);
        assert_eq!(app.spec.descriptor.links[1].description, LINK_SOURCE_REPO);
        assert_eq!(app.spec.descriptor.maintainers[0].email.as_deref(), Some("james@jetstack.io"));
    }

    #[tokio::test]
    async fn test_icon_type_is_sniffed() {
        let server = MockServer::start().await;
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend(std::iter::repeat_n(0u8, 2048));
        Mock::given(method("GET"))
            .and(path("/logo"))
            .and(header("range", "bytes=0-511"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(png))
            .mount(&server)
            .await;

        let app = ApplicationAggregator::new()
            .aggregate(&release(Some(format!("{}/logo", server.uri()))), None)
            .await
            .unwrap();
        assert_eq!(app.spec.descriptor.icons[0].mime_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_icon_type_falls_back_to_extension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let app = ApplicationAggregator::new()
            .aggregate(&release(Some(format!("{}/icons/logo.SVG?v=2", server.uri()))), None)
            .await
            .unwrap();
        assert_eq!(app.spec.descriptor.icons[0].mime_type.as_deref(), Some("image/svg+xml"));
    }

    #[test]
    fn test_sniff_image() {
        assert_eq!(sniff_image(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"\">"), Some("image/svg+xml"));
        assert_eq!(sniff_image(b"\xff\xd8\xff\xe0"), Some("image/jpeg"));
        assert_eq!(sniff_image(b"plain text"), None);
    }
}
