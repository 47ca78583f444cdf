//! Resolver and builder against an in-memory registry

use kubepack_bundle::{BundleError, BundleResolver, OrderBuilder};
use kubepack_core::{Chart, ChartRef, GroupResource, PackageCard, UNBOUNDED_WAIT};
use kubepack_repo::MemoryRegistry;
use std::time::Duration;

const CHARTS: &str = "https://charts.appscode.com/stable/";
const BUNDLES: &str = "https://bundles.kubepack.com/";

fn chart(name: &str, version: &str, description: &str) -> Chart {
    Chart::from_files(vec![(
        "Chart.yaml".to_string(),
        format!("apiVersion: v2\nname: {name}\nversion: {version}\ndescription: {description}\nicon: https://cdn.example.com/{name}.png\n")
            .into_bytes(),
    )])
    .unwrap()
}

fn bundle_chart(name: &str, version: &str, spec: &str) -> Chart {
    let doc = format!(
        "apiVersion: kubepack.com/v1alpha1\nkind: Bundle\nmetadata:\n  name: {name}\nspec:\n{spec}"
    );
    Chart::from_files(vec![
        (
            "Chart.yaml".to_string(),
            format!("apiVersion: v2\nname: {name}\nversion: {version}\n").into_bytes(),
        ),
        ("templates/bundle.yaml".to_string(), doc.into_bytes()),
    ])
    .unwrap()
}

fn kubedb_registry() -> MemoryRegistry {
    let registry = MemoryRegistry::new()
        .with_chart(CHARTS, chart("kubedb-community", "v0.13.0-rc.2", "KubeDB community operator"))
        .with_chart(CHARTS, chart("kubedb-enterprise", "v0.13.0-rc.2", "KubeDB enterprise operator"))
        .with_chart(CHARTS, chart("kubedb-catalog", "v0.13.0-rc.2", "KubeDB catalog"));

    registry.insert(
        BUNDLES,
        bundle_chart(
            "kubedb-community-bundle",
            "v0.13.0-rc.2",
            &format!(
                "  displayName: KubeDB Community\n  namespace: kube-system\n  features:\n    - trait: Backup\n      value: Stash\n  packages:\n    - chart:\n        url: {CHARTS}\n        name: kubedb-community\n        required: true\n        versions:\n          - version: v0.13.0-rc.2\n    - chart:\n        url: {CHARTS}\n        name: kubedb-catalog\n        versions:\n          - version: v0.13.0-rc.2\n"
            ),
        ),
    );
    registry.insert(
        BUNDLES,
        bundle_chart(
            "kubedb-enterprise-bundle",
            "v0.13.0-rc.2",
            &format!(
                "  displayName: KubeDB Enterprise\n  namespace: kube-system\n  features:\n    - trait: Clustering\n      value: \"yes\"\n    - trait: Backup\n      value: Stash Enterprise\n  packages:\n    - chart:\n        url: {CHARTS}\n        name: kubedb-enterprise\n        licenseKeyPath: /license\n        versions:\n          - version: v0.13.0-rc.2\n"
            ),
        ),
    );
    registry.insert(
        BUNDLES,
        bundle_chart(
            "kubedb-bundle",
            "v0.13.0-rc.2",
            &format!(
                "  displayName: KubeDB\n  packages:\n    - oneOf:\n        description: KubeDB edition\n        bundles:\n          - url: {BUNDLES}\n            name: kubedb-community-bundle\n            version: v0.13.0-rc.2\n          - url: {BUNDLES}\n            name: kubedb-enterprise-bundle\n            version: v0.13.0-rc.2\n"
            ),
        ),
    );
    registry
}

#[tokio::test]
async fn test_resolve_one_of_tree() {
    let resolver = BundleResolver::new(kubedb_registry());
    let view = resolver
        .resolve(&ChartRef::new(BUNDLES, "kubedb-bundle", "v0.13.0-rc.2"))
        .await
        .unwrap();

    assert_eq!(view.display_name, "KubeDB");
    assert_eq!(view.depth, 0);
    let PackageCard::OneOf(one_of) = &view.packages[0] else {
        panic!("expected a oneOf card");
    };
    assert_eq!(one_of.alternatives.len(), 2);
    let community = &one_of.alternatives[0].view;
    assert_eq!(community.depth, 1);

    let PackageCard::Chart(operator) = &community.packages[0] else {
        panic!("expected a chart card");
    };
    assert_eq!(operator.description, "KubeDB community operator");
    assert_eq!(operator.namespace, "kube-system");
    assert_eq!(operator.icons[0].src, "https://cdn.example.com/kubedb-community.png");
    // Nested cards are never required; single versions are preselected
    assert!(!operator.required);
    assert!(operator.versions[0].option.selected);
}

#[tokio::test]
async fn test_one_of_selection_drives_order() {
    let resolver = BundleResolver::new(kubedb_registry());
    let mut view = resolver
        .resolve(&ChartRef::new(BUNDLES, "kubedb-bundle", ""))
        .await
        .unwrap();

    let err = OrderBuilder::new().build(&view).unwrap_err();
    assert!(matches!(err, BundleError::NoOneOfSelection { .. }));

    let PackageCard::OneOf(one_of) = &mut view.packages[0] else {
        panic!("expected a oneOf card");
    };
    assert!(one_of.select("kubedb-community-bundle"));

    let order = OrderBuilder::new().build(&view).unwrap();
    let names: Vec<_> = order.selections().iter().map(|s| s.release_name.as_str()).collect();
    assert_eq!(names, vec!["kubedb-community", "kubedb-catalog"]);
    assert_eq!(order.selections()[0].chart.version, "v0.13.0-rc.2");
    assert_eq!(
        order.selections()[0].parent_bundle().map(|c| c.name.as_str()),
        Some("kubedb-community-bundle")
    );
}

#[tokio::test]
async fn test_wait_clauses_carried_into_order() {
    let registry = MemoryRegistry::new().with_chart(CHARTS, chart("stash", "v0.9.0", "Stash"));
    registry.insert(
        BUNDLES,
        bundle_chart(
            "stash-bundle",
            "v0.9.0",
            &format!(
                "  namespace: kube-system\n  packages:\n    - chart:\n        url: {CHARTS}\n        name: stash\n        required: true\n        versions:\n          - version: v0.9.0\n            waitFors:\n              - resourceGroup: deployments.apps\n                labelSelector: app=stash\n                forCondition: condition=Available\n                timeout: 5m\n              - resourceGroup: apps/statefulsets\n                resourceName: stash-db\n                forCondition: condition=Ready\n                timeout: -1s\n"
            ),
        ),
    );

    let view = BundleResolver::new(registry)
        .resolve(&ChartRef::new(BUNDLES, "stash-bundle", "v0.9.0"))
        .await
        .unwrap();
    let order = OrderBuilder::new().build(&view).unwrap();

    let waits = &order.selections()[0].wait_fors;
    assert_eq!(waits.len(), 2);
    assert_eq!(waits[0].resource, GroupResource::new("apps", "deployments"));
    assert_eq!(waits[0].selector.as_deref(), Some("app=stash"));
    assert_eq!(waits[0].effective_timeout(), Duration::from_secs(300));
    assert_eq!(waits[1].resource, GroupResource::new("apps", "statefulsets"));
    assert_eq!(waits[1].resource_name.as_deref(), Some("stash-db"));
    assert_eq!(waits[1].effective_timeout(), UNBOUNDED_WAIT);
}

#[tokio::test]
async fn test_cycle_detected() {
    let registry = MemoryRegistry::new();
    registry.insert(
        BUNDLES,
        bundle_chart(
            "a",
            "v1",
            &format!("  packages:\n    - bundle:\n        url: {BUNDLES}\n        name: b\n        version: v1\n"),
        ),
    );
    registry.insert(
        BUNDLES,
        bundle_chart(
            "b",
            "v1",
            &format!("  packages:\n    - bundle:\n        url: {BUNDLES}\n        name: a\n        version: v1\n"),
        ),
    );

    let err = BundleResolver::new(registry)
        .resolve(&ChartRef::new(BUNDLES, "a", "v1"))
        .await
        .unwrap_err();
    match err {
        BundleError::CycleDetected { chain } => assert_eq!(chain, "a@v1 -> b@v1 -> a@v1"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_shared_bundle_is_not_a_cycle() {
    let registry = MemoryRegistry::new().with_chart(CHARTS, chart("stash", "v0.9.0", "Stash"));
    registry.insert(
        BUNDLES,
        bundle_chart(
            "stash-bundle",
            "v0.9.0",
            &format!("  packages:\n    - chart:\n        url: {CHARTS}\n        name: stash\n        versions:\n          - version: v0.9.0\n"),
        ),
    );
    registry.insert(
        BUNDLES,
        bundle_chart(
            "root",
            "v1",
            &format!(
                "  packages:\n    - bundle:\n        url: {BUNDLES}\n        name: stash-bundle\n        version: v0.9.0\n    - bundle:\n        url: {BUNDLES}\n        name: stash-bundle\n        version: v0.9.0\n"
            ),
        ),
    );

    let view = BundleResolver::new(registry)
        .resolve(&ChartRef::new(BUNDLES, "root", "v1"))
        .await
        .unwrap();
    assert_eq!(view.chart_cards().len(), 2);
}

#[tokio::test]
async fn test_missing_chart_version_is_not_found() {
    let registry = MemoryRegistry::new();
    registry.insert(
        BUNDLES,
        bundle_chart(
            "broken",
            "v1",
            &format!("  packages:\n    - chart:\n        url: {CHARTS}\n        name: ghost\n        versions:\n          - version: v1\n"),
        ),
    );
    let err = BundleResolver::new(registry)
        .resolve(&ChartRef::new(BUNDLES, "broken", "v1"))
        .await
        .unwrap_err();
    assert!(err.is_input_error());
}

#[tokio::test]
async fn test_not_a_bundle() {
    let registry = MemoryRegistry::new().with_chart(CHARTS, chart("stash", "v0.9.0", "Stash"));
    let err = BundleResolver::new(registry)
        .resolve(&ChartRef::new(CHARTS, "stash", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, BundleError::NotABundle { .. }));
}

#[tokio::test]
async fn test_compare_features() {
    let resolver = BundleResolver::new(kubedb_registry());
    let table = resolver
        .compare(
            BUNDLES,
            &["kubedb-community-bundle".to_string(), "kubedb-enterprise-bundle".to_string()],
            "v0.13.0-rc.2",
        )
        .await
        .unwrap();

    assert_eq!(table.bundles, vec!["kubedb-community-bundle", "kubedb-enterprise-bundle"]);
    let rows: Vec<_> = table
        .rows
        .iter()
        .map(|r| (r.trait_name.as_str(), r.values.clone()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("Backup", vec!["Stash".to_string(), "Stash Enterprise".to_string()]),
            ("Clustering", vec![String::new(), "yes".to_string()]),
        ]
    );
}
