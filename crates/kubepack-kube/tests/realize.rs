//! Realizer, script writer and auditor against the in-memory cluster

use std::sync::Arc;
use std::time::Duration;

use kubepack_bundle::OrderBuilder;
use kubepack_core::{
    BundleView, Chart, ChartRef, ChartSelection, GroupKind, GroupResource, Order, PackageCard,
    ReleaseStatus, WaitFlags,
};
use kubepack_kube::{
    ApplicationAggregator, ClusterGateway, KubeError, MemoryDriver, MockGateway,
    PermissionAuditor, RealizeOptions, Realizer, ScriptWriter, StorageDriver,
};
use kubepack_publish::{ArtifactPublisher, BlobStore, ScriptFlavor};
use kubepack_repo::MemoryRegistry;
use tokio_util::sync::CancellationToken;

const JETSTACK: &str = "https://charts.jetstack.io";
const APPSCODE: &str = "https://charts.appscode.com/stable/";

const CERTIFICATES_CRD: &str = r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: certificates.cert-manager.io
spec:
  group: cert-manager.io
  scope: Namespaced
  names:
    kind: Certificate
    plural: certificates
  versions:
    - name: v1alpha2
      served: true
      storage: true
"#;

const ISSUERS_CRD: &str = r#"apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: issuers.cert-manager.io
spec:
  group: cert-manager.io
  scope: Namespaced
  names:
    kind: Issuer
    plural: issuers
  versions:
    - name: v1alpha2
      served: true
      storage: true
"#;

const SERVICE_ACCOUNT: &str = r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: {{ release.name }}
  labels:
    app: cert-manager
"#;

const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ release.name }}
  labels:
    app: cert-manager
spec:
  replicas: {{ values.replicaCount }}
  selector:
    matchLabels:
      app: cert-manager
  template:
    metadata:
      labels:
        app: cert-manager
    spec:
      serviceAccountName: {{ release.name }}
      containers:
        - name: controller
          image: quay.io/jetstack/cert-manager-controller:{{ chart.appVersion }}
"#;

const STARTUP_CHECK: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: {{ release.name }}-startupapicheck
  labels:
    app: cert-manager
  annotations:
    helm.sh/hook: post-install
    helm.sh/hook-delete-policy: hook-succeeded
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: check
          image: quay.io/jetstack/cert-manager-ctl:{{ chart.appVersion }}
"#;

fn file(name: &str, data: &str) -> (String, Vec<u8>) {
    (name.to_string(), data.as_bytes().to_vec())
}

fn cert_manager() -> Chart {
    Chart::from_files(vec![
        file(
            "Chart.yaml",
            "apiVersion: v2\nname: cert-manager\nversion: v0.13.1\nappVersion: v0.13.1\nhome: https://github.com/jetstack/cert-manager\nsources:\n  - https://github.com/jetstack/cert-manager\n",
        ),
        file("values.yaml", "replicaCount: 1\n"),
        file("crds/certificates.yaml", CERTIFICATES_CRD),
        file("templates/crd-issuers.yaml", ISSUERS_CRD),
        file("templates/serviceaccount.yaml", SERVICE_ACCOUNT),
        file("templates/deployment.yaml", DEPLOYMENT),
        file("templates/startupapicheck.yaml", STARTUP_CHECK),
    ])
    .unwrap()
}

fn stash(version: &str) -> Chart {
    Chart::from_files(vec![
        file(
            "Chart.yaml",
            &format!("apiVersion: v2\nname: stash\nversion: {version}\n"),
        ),
        file("values.yaml", "license:\n  key: \"\"\n"),
        file(
            "templates/license.yaml",
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {{ release.name }}-license\nstringData:\n  key: {{ values.license.key | quote }}\n",
        ),
        file(
            "templates/deployment.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ release.name }}\n  labels:\n    app: {{ release.name }}\nspec:\n  replicas: 1\n",
        ),
    ])
    .unwrap()
}

fn registry() -> Arc<MemoryRegistry> {
    Arc::new(
        MemoryRegistry::new()
            .with_chart(JETSTACK, cert_manager())
            .with_chart(APPSCODE, stash("v1"))
            .with_chart(APPSCODE, stash("v2")),
    )
}

fn available_deployments(timeout: Duration) -> WaitFlags {
    WaitFlags {
        resource: GroupResource::new("apps", "deployments"),
        all: true,
        timeout,
        for_condition: "condition=Available".to_string(),
        ..Default::default()
    }
}

/// cert-manager into its own namespace
fn cert_manager_order() -> Order {
    Order::new(
        "cert-manager",
        vec![ChartSelection {
            chart: ChartRef::new(JETSTACK, "cert-manager", "v0.13.1"),
            release_name: "cert-manager".to_string(),
            namespace: "cert-manager".to_string(),
            wait_fors: vec![available_deployments(Duration::from_secs(300))],
            ..Default::default()
        }],
    )
}

fn stash_selection(version: &str, release_name: &str) -> ChartSelection {
    ChartSelection {
        chart: ChartRef::new(APPSCODE, "stash", version),
        release_name: release_name.to_string(),
        namespace: "kube-system".to_string(),
        ..Default::default()
    }
}

fn options() -> RealizeOptions {
    RealizeOptions {
        release_timeout: Duration::from_secs(5),
        crd_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    }
}

fn realizer(gateway: &MockGateway, storage: &MemoryDriver) -> Realizer {
    Realizer::new(registry(), Arc::new(gateway.clone()), Arc::new(storage.clone()))
        .with_aggregator(ApplicationAggregator::offline())
        .with_options(options())
}

#[tokio::test]
async fn test_linear_install() {
    let gateway = MockGateway::new().with_application_crd();
    let storage = MemoryDriver::new();
    let order = cert_manager_order();

    let report = realizer(&gateway, &storage)
        .install(&order, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.uid, order.uid());
    assert_eq!(report.releases.len(), 1);
    assert_eq!(report.releases[0].status, ReleaseStatus::Deployed);
    assert!(!report.releases[0].upgraded);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    assert!(gateway.object("Namespace", None, "cert-manager").is_some());
    assert!(
        gateway
            .object("CustomResourceDefinition", None, "certificates.cert-manager.io")
            .is_some()
    );
    assert!(gateway.object("Deployment", Some("cert-manager"), "cert-manager").is_some());
    // hook-succeeded removed the Job once it completed
    assert!(
        gateway
            .object("Job", Some("cert-manager"), "cert-manager-startupapicheck")
            .is_none()
    );

    let release = storage.last("cert-manager", "cert-manager").await.unwrap().unwrap();
    assert_eq!(release.version, 1);
    assert_eq!(release.info.status, ReleaseStatus::Deployed);
    assert_eq!(release.info.description, "Install complete");
    assert_eq!(release.hooks[0].last_run.phase, "Succeeded");

    let app = gateway
        .object("Application", Some("cert-manager"), "cert-manager")
        .unwrap();
    let kinds: Vec<GroupKind> = serde_json::from_value(app["spec"]["componentKinds"].clone()).unwrap();
    for expected in [
        GroupKind::new("apps", "Deployment"),
        GroupKind::new("", "ServiceAccount"),
        GroupKind::new("apiextensions.k8s.io", "CustomResourceDefinition"),
        GroupKind::new("batch", "Job"),
    ] {
        assert!(kinds.contains(&expected), "missing {expected}");
    }
    assert_eq!(app["spec"]["assemblyPhase"], "Succeeded");
    assert_eq!(app["spec"]["package"]["chart"]["name"], "cert-manager");
    assert_eq!(app["spec"]["selector"]["matchLabels"]["app"], "cert-manager");
}

#[tokio::test]
async fn test_missing_application_kind_is_a_warning() {
    let gateway = MockGateway::new();
    let storage = MemoryDriver::new();

    let report = realizer(&gateway, &storage)
        .install(&cert_manager_order(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.releases[0].status, ReleaseStatus::Deployed);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("application not emitted"));
}

#[tokio::test]
async fn test_multi_version_selections() {
    let gateway = MockGateway::new().with_application_crd();
    let storage = MemoryDriver::new();
    let order = Order::new(
        "stash",
        vec![stash_selection("v1", "stash-v1"), stash_selection("v2", "stash-v2")],
    );

    let report = realizer(&gateway, &storage)
        .install(&order, &CancellationToken::new())
        .await
        .unwrap();

    let names: Vec<_> = report.releases.iter().map(|r| r.release.as_str()).collect();
    assert_eq!(names, ["stash-v1", "stash-v2"]);
    assert!(report.releases.iter().all(|r| r.namespace == "kube-system"));
    assert!(gateway.object("Deployment", Some("kube-system"), "stash-v1").is_some());
    assert!(gateway.object("Deployment", Some("kube-system"), "stash-v2").is_some());
    assert_eq!(storage.release_count(), 2);
}

#[tokio::test]
async fn test_reinstall_upgrades_with_same_manifest() {
    let gateway = MockGateway::new().with_application_crd();
    let storage = MemoryDriver::new();
    let realizer = realizer(&gateway, &storage);
    let order = cert_manager_order();

    realizer.install(&order, &CancellationToken::new()).await.unwrap();
    let first = storage.last("cert-manager", "cert-manager").await.unwrap().unwrap();

    let report = realizer.install(&order, &CancellationToken::new()).await.unwrap();
    assert!(report.releases[0].upgraded);
    assert_eq!(report.releases[0].revision, 2);

    let history = storage.history("cert-manager", "cert-manager").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].info.status, ReleaseStatus::Deployed);
    assert_eq!(history[0].info.description, "Upgrade complete");
    assert_eq!(history[1].info.status, ReleaseStatus::Superseded);
    assert_eq!(history[0].manifest, first.manifest);
    assert_eq!(history[0].info.first_deployed, first.info.first_deployed);
}

#[tokio::test]
async fn test_revisions_replay_deterministically() {
    let order = Order::new(
        "stash",
        vec![stash_selection("v1", "stash-v1"), stash_selection("v2", "stash-v2")],
    );

    let mut runs = Vec::new();
    for _ in 0..2 {
        let gateway = MockGateway::new().with_application_crd();
        let storage = MemoryDriver::new();
        let realizer = realizer(&gateway, &storage);
        realizer.install(&order, &CancellationToken::new()).await.unwrap();
        let report = realizer.install(&order, &CancellationToken::new()).await.unwrap();
        let revisions: Vec<(String, u32)> = report
            .releases
            .into_iter()
            .map(|r| (r.release, r.revision))
            .collect();
        runs.push((revisions, gateway.writes()));
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].0, [("stash-v1".to_string(), 2), ("stash-v2".to_string(), 2)]);
}

#[tokio::test]
async fn test_wait_timeout_stops_order() {
    let gateway = MockGateway::new().with_application_crd().without_auto_ready();
    let storage = MemoryDriver::new();
    let mut first = stash_selection("v1", "stash-v1");
    first.wait_fors = vec![available_deployments(Duration::from_millis(50))];
    let order = Order::new("stash", vec![first, stash_selection("v2", "stash-v2")]);

    let err = realizer(&gateway, &storage)
        .install(&order, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, KubeError::Timeout { .. }), "{err}");
    // the release itself went through, the second selection never started
    let release = storage.last("kube-system", "stash-v1").await.unwrap().unwrap();
    assert_eq!(release.info.status, ReleaseStatus::Deployed);
    assert!(storage.last("kube-system", "stash-v2").await.unwrap().is_none());
    assert!(gateway.object("Deployment", Some("kube-system"), "stash-v2").is_none());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let gateway = MockGateway::new();
    let storage = MemoryDriver::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = realizer(&gateway, &storage)
        .install(&cert_manager_order(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, KubeError::Cancelled));
    assert_eq!(storage.release_count(), 0);
}

#[tokio::test]
async fn test_uninstall_keeps_crds() {
    let gateway = MockGateway::new().with_application_crd();
    let storage = MemoryDriver::new();
    let realizer = realizer(&gateway, &storage);
    let order = cert_manager_order();
    realizer.install(&order, &CancellationToken::new()).await.unwrap();

    let report = realizer.uninstall(&order, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.releases.len(), 1);
    assert_eq!(report.releases[0].revisions, 1);
    assert!(
        report.releases[0]
            .kept
            .iter()
            .any(|k| k.contains("issuers.cert-manager.io"))
    );
    assert!(gateway.object("Deployment", Some("cert-manager"), "cert-manager").is_none());
    assert!(gateway.object("ServiceAccount", Some("cert-manager"), "cert-manager").is_none());
    assert!(gateway.object("Application", Some("cert-manager"), "cert-manager").is_none());
    assert!(
        gateway
            .object("CustomResourceDefinition", None, "issuers.cert-manager.io")
            .is_some()
    );
    assert!(
        gateway
            .object("CustomResourceDefinition", None, "certificates.cert-manager.io")
            .is_some()
    );
    assert!(storage.last("cert-manager", "cert-manager").await.unwrap().is_none());

    // nothing left to remove
    let again = realizer.uninstall(&order, &CancellationToken::new()).await.unwrap();
    assert!(again.releases.is_empty());
    assert_eq!(again.warnings, ["cert-manager/cert-manager: release not found"]);
}

#[tokio::test]
async fn test_audit_denied_crd_create() {
    let gateway = MockGateway::new().deny("create", "apiextensions.k8s.io", "customresourcedefinitions");
    let auditor = PermissionAuditor::new(registry(), Arc::new(gateway));

    let report = auditor.audit(&cert_manager_order(), "create").await.unwrap();

    assert!(!report.allowed);
    let denied: Vec<_> = report.denied().collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].attributes.group, "apiextensions.k8s.io");
    assert_eq!(denied[0].attributes.resource, "customresourcedefinitions");
    assert_eq!(denied[0].attributes.verb, "create");
    assert_eq!(denied[0].attributes.namespace, "");
    assert!(
        denied[0]
            .items
            .iter()
            .any(|i| i.ends_with("certificates.cert-manager.io"))
    );

    let deployments = report
        .entries
        .iter()
        .find(|e| e.attributes.resource == "deployments")
        .unwrap();
    // no namespace in the template
    assert_eq!(deployments.attributes.namespace, "default");
    assert!(deployments.allowed);
}

#[tokio::test]
async fn test_yaml_script_matches_install() {
    let publisher = ArtifactPublisher::new(BlobStore::in_memory());
    let order = cert_manager_order();

    let refs = ScriptWriter::new(registry(), publisher.clone())
        .with_aggregator(ApplicationAggregator::offline())
        .write(&order, ScriptFlavor::Yaml)
        .await
        .unwrap();
    assert_eq!(refs.linux, refs.darwin);
    assert!(refs.linux.ends_with(&format!("{}/script.sh", order.uid())));

    let script = publisher.get(order.uid(), "script.sh").await.unwrap();
    let script = String::from_utf8(script.to_vec()).unwrap();
    assert!(script.starts_with("#!/bin/sh\nset -eu\n"));
    assert!(script.contains("crds/certificates.cert-manager.io.yaml"));
    assert!(script.contains("manifests/cert-manager.yaml --namespace=cert-manager"));
    assert!(script.contains(
        "kubectl wait deployments.apps --all --namespace=cert-manager --for=condition=Available --timeout=300s"
    ));
    assert!(script.contains("apps/cert-manager/cert-manager.yaml"));

    // applying the published stream gives the same objects as a realized install
    let manifest = publisher.get(order.uid(), "manifests/cert-manager.yaml").await.unwrap();
    let docs = kubepack_engine::parse_manifest(std::str::from_utf8(&manifest).unwrap()).unwrap();
    let scripted = MockGateway::new();
    scripted.ensure_namespace("cert-manager").await.unwrap();
    let crd = serde_yaml::from_str(CERTIFICATES_CRD).unwrap();
    scripted
        .apply(&kubepack_kube::ResourceMapping::crds(), &crd)
        .await
        .unwrap();
    let docs: Vec<_> = docs.iter().collect();
    kubepack_kube::ResourceManager::new(Arc::new(scripted.clone()))
        .apply_documents(&docs, "cert-manager")
        .await
        .unwrap();

    let installed = MockGateway::new();
    let storage = MemoryDriver::new();
    realizer(&installed, &storage)
        .install(&order, &CancellationToken::new())
        .await
        .unwrap();

    for (kind, namespace, name) in [
        ("Deployment", Some("cert-manager"), "cert-manager"),
        ("ServiceAccount", Some("cert-manager"), "cert-manager"),
        ("CustomResourceDefinition", None, "issuers.cert-manager.io"),
        ("CustomResourceDefinition", None, "certificates.cert-manager.io"),
    ] {
        let scripted = scripted.object(kind, namespace, name).unwrap();
        let installed = installed.object(kind, namespace, name).unwrap();
        assert_eq!(scripted["spec"], installed["spec"], "{kind}/{name}");
    }
}

#[tokio::test]
async fn test_helm3_script() {
    let publisher = ArtifactPublisher::new(BlobStore::in_memory());
    let mut selection = stash_selection("v1", "stash");
    selection.values_patch = Some(
        serde_json::from_value(serde_json::json!([
            {"op": "replace", "path": "/license/key", "value": "my key"}
        ]))
        .unwrap(),
    );
    let order = Order::new("stash", vec![selection]);

    ScriptWriter::new(registry(), publisher.clone())
        .with_aggregator(ApplicationAggregator::offline())
        .write(&order, ScriptFlavor::Helm3)
        .await
        .unwrap();

    let script = publisher.get(order.uid(), "helm3.sh").await.unwrap();
    let script = String::from_utf8(script.to_vec()).unwrap();
    assert!(script.contains("kubectl apply -f https://github.com/kubernetes-sigs/application/"));
    assert!(script.contains("helm repo add charts-appscode-com-stable https://charts.appscode.com/stable/"));
    assert!(script.contains(
        "helm upgrade --install stash charts-appscode-com-stable/stash --namespace kube-system --create-namespace --version v1 --set 'license.key=my key'"
    ));
    assert!(script.contains("apps/kube-system/stash.yaml"));
}

#[tokio::test]
async fn test_license_key_reaches_manifest() {
    let registry = registry();
    registry.insert(
        "https://bundles.kubepack.com/",
        Chart::from_files(vec![
            file("Chart.yaml", "apiVersion: v2\nname: stash-bundle\nversion: v1\n"),
            file(
                "templates/bundle.yaml",
                &format!(
                    "apiVersion: kubepack.com/v1alpha1\nkind: Bundle\nmetadata:\n  name: stash-bundle\nspec:\n  namespace: kube-system\n  packages:\n    - chart:\n        url: {APPSCODE}\n        name: stash\n        required: true\n        licenseKeyPath: /license/key\n        versions:\n          - version: v1\n"
                ),
            ),
        ])
        .unwrap(),
    );
    let view: BundleView = kubepack_bundle::BundleResolver::new(registry.clone())
        .resolve(&ChartRef::new("https://bundles.kubepack.com/", "stash-bundle", "v1"))
        .await
        .unwrap();
    let PackageCard::Chart(card) = &view.packages[0] else {
        panic!("expected a chart card");
    };
    assert!(card.versions[0].option.selected);

    let order = OrderBuilder::new().license_key("L").build(&view).unwrap();
    let patch = serde_json::to_value(order.selections()[0].values_patch.as_ref().unwrap()).unwrap();
    let last = patch.as_array().unwrap().last().unwrap();
    assert_eq!(last["op"], "replace");
    assert_eq!(last["path"], "/license/key");
    assert_eq!(last["value"], "L");

    let gateway = MockGateway::new().with_application_crd();
    let storage = MemoryDriver::new();
    Realizer::new(registry, Arc::new(gateway.clone()), Arc::new(storage.clone()))
        .with_aggregator(ApplicationAggregator::offline())
        .with_options(options())
        .install(&order, &CancellationToken::new())
        .await
        .unwrap();

    let secret = gateway
        .object("Secret", Some("kube-system"), "stash-license")
        .unwrap();
    assert_eq!(secret["stringData"]["key"], "L");
    let release = storage.last("kube-system", "stash").await.unwrap().unwrap();
    assert_eq!(release.config["license"]["key"], "L");
}
