//! Integration tests for CLI commands
//!
//! Charts come from the local fixtures directory, so no command here
//! touches the network or a cluster.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const BUNDLES: &str = "https://bundles.kubepack.com/";

struct Env {
    dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "").unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Run kubepack with an isolated config, cache and blob store
    fn kubepack(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kubepack"))
            .args(args)
            .env("KUBEPACK_CONFIG", self.path("config.yaml"))
            .env("KUBEPACK_CACHE_DIR", self.path("cache"))
            .env("UI_WIZARD_CHARTS_DIR", fixtures_path())
            .env_remove("KUBEPACK_BLOB_URL")
            .env_remove("KUBEPACK_PUBLIC_URL")
            .env_remove("KUBEPACK_STORAGE_DRIVER")
            .env_remove("KUBEPACK_LICENSE_KEY")
            .env("NO_COLOR", "1")
            .output()
            .expect("failed to execute kubepack")
    }

    fn blob_url(&self) -> String {
        format!("file://{}", self.path("blobs").display())
    }

    /// `view` the stash bundle into `view.yaml`
    fn write_view(&self) -> PathBuf {
        let output = self.kubepack(&["view", "--url", BUNDLES, "--name", "stash-bundle", "--version", "v0.9.0"]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let path = self.path("view.yaml");
        std::fs::write(&path, &output.stdout).unwrap();
        path
    }

    /// `order` the stash bundle into `order.yaml`
    fn write_order(&self, extra: &[&str]) -> PathBuf {
        let view = self.write_view();
        let mut args = vec!["order", view.to_str().unwrap()];
        args.extend_from_slice(extra);
        let output = self.kubepack(&args);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let path = self.path("order.yaml");
        std::fs::write(&path, &output.stdout).unwrap();
        path
    }
}

fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/charts")
}

fn order_uid(path: &Path) -> String {
    let order: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    order["metadata"]["uid"].as_str().unwrap().to_string()
}

mod view_command {
    use super::*;

    #[test]
    fn test_view_bundle() {
        let env = Env::new();
        let output = env.kubepack(&[
            "view", "--url", BUNDLES, "--name", "stash-bundle", "--version", "v0.9.0", "-o", "json",
        ]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(view["displayName"], "Stash");
        let card = &view["packages"][0]["chart"];
        assert_eq!(card["name"], "stash");
        assert_eq!(card["namespace"], "kube-system");
        assert_eq!(card["required"], true);
    }

    #[test]
    fn test_view_missing_chart() {
        let env = Env::new();
        let output = env.kubepack(&["view", "--url", "file:///nonexistent", "--name", "voyager", "--version", "v1"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_package_view() {
        let env = Env::new();
        let output = env.kubepack(&[
            "package",
            "--url",
            "https://charts.appscode.com/stable/",
            "--name",
            "stash",
            "--version",
            "v0.9.0-rc.6",
        ]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("replicaCount: 1"));
    }
}

mod order_command {
    use super::*;

    #[test]
    fn test_order_injects_license() {
        let env = Env::new();
        let path = env.write_order(&["--license-key", "stash-license-1234"]);
        let order: serde_yaml::Value = serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(order["kind"], "Order");
        let selection = &order["spec"]["packages"][0];
        assert_eq!(selection["releaseName"], "stash");
        assert_eq!(selection["namespace"], "kube-system");
        let patch = serde_yaml::to_string(&selection["valuesPatch"]).unwrap();
        assert!(patch.contains("/license/key"));
        assert!(patch.contains("stash-license-1234"));
    }

    #[test]
    fn test_publish_requires_blob_store() {
        let env = Env::new();
        let view = env.write_view();
        let output = env.kubepack(&["order", view.to_str().unwrap(), "--publish"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("blob"));
    }
}

mod script_command {
    use super::*;

    #[test]
    fn test_yaml_script_from_file() {
        let env = Env::new();
        let order = env.write_order(&[]);
        let uid = order_uid(&order);
        let blob_url = env.blob_url();

        let output = env.kubepack(&[
            "script",
            "-f",
            order.to_str().unwrap(),
            "--flavor",
            "yaml",
            "--blob-url",
            &blob_url,
        ]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains(&format!("{uid}/script.sh")));

        let script = std::fs::read_to_string(env.path("blobs").join(&uid).join("script.sh")).unwrap();
        assert!(script.starts_with("#!/bin/sh\nset -eu\n"));
        assert!(script.contains("kubectl create namespace kube-system"));
        assert!(script.contains("manifests/stash.yaml"));
        assert!(env.path("blobs").join(&uid).join("manifests/stash.yaml").is_file());
    }

    #[test]
    fn test_helm3_script_from_stored_order() {
        let env = Env::new();
        let view = env.write_view();
        let blob_url = env.blob_url();

        let output = env.kubepack(&["order", view.to_str().unwrap(), "--publish", "--blob-url", &blob_url]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        assert!(url.ends_with("/order.yaml"));
        let uid = url.trim_end_matches("/order.yaml").rsplit('/').next().unwrap().to_string();

        let output = env.kubepack(&["script", "--uid", &uid, "--blob-url", &blob_url]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let script = std::fs::read_to_string(env.path("blobs").join(&uid).join("helm3.sh")).unwrap();
        assert!(script.contains("helm repo add charts-appscode-com-stable https://charts.appscode.com/stable/"));
        assert!(script.contains("helm upgrade --install stash charts-appscode-com-stable/stash"));
        assert!(script.contains("--version v0.9.0-rc.6"));
    }

    #[test]
    fn test_unknown_stored_order() {
        let env = Env::new();
        let blob_url = env.blob_url();
        let output = env.kubepack(&[
            "script",
            "--uid",
            "5c8d1e2a-3b4f-4c6d-8e9f-0a1b2c3d4e5f",
            "--blob-url",
            &blob_url,
        ]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
    }
}

mod compare_command {
    use super::*;

    #[test]
    fn test_compare_table() {
        let env = Env::new();
        let output = env.kubepack(&[
            "compare",
            "--url",
            BUNDLES,
            "--bundle",
            "stash-bundle",
            "--bundle",
            "stash-enterprise-bundle",
            "--version",
            "v0.9.0",
        ]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("FEATURE"));
        assert!(lines[0].contains("stash-enterprise-bundle"));
        assert!(lines[3].starts_with("Auto backup"));
    }

    #[test]
    fn test_compare_catalog_product() {
        let env = Env::new();
        std::fs::write(
            env.path("config.yaml"),
            format!(
                "products:\n  appscode:\n    stash:\n      repoUrl: {BUNDLES}\n      bundles: [stash-bundle, stash-enterprise-bundle]\n      version: v0.9.0\n"
            ),
        )
        .unwrap();

        let output = env.kubepack(&["compare", "--product", "appscode/stash", "-o", "json"]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let table: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(table["rows"][1]["trait"], "Volume snapshots");
        assert_eq!(table["rows"][1]["values"], serde_json::json!(["no", "yes"]));

        let output = env.kubepack(&["compare", "--product", "appscode/kubedb"]);
        assert_eq!(output.status.code(), Some(1));
    }
}

mod errors {
    use super::*;

    #[test]
    fn test_install_requires_order() {
        let env = Env::new();
        let output = env.kubepack(&["install"]);
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn test_missing_order_file() {
        let env = Env::new();
        let missing = env.path("missing.yaml");
        let output = env.kubepack(&["uninstall", "-f", missing.to_str().unwrap()]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("kubepack order"));
    }

    #[test]
    fn test_bad_config_file() {
        let env = Env::new();
        std::fs::write(env.path("config.yaml"), "bind: nowhere\n").unwrap();
        let output = env.kubepack(&["compare", "--url", BUNDLES, "--bundle", "stash-bundle"]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stderr).contains("Configuration error"));
    }

    #[test]
    fn test_help_exits_zero() {
        let env = Env::new();
        let output = env.kubepack(&["--help"]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["view", "package", "order", "install", "uninstall", "script", "audit", "compare", "serve"] {
            assert!(stdout.contains(command), "help is missing {command}");
        }
    }
}
