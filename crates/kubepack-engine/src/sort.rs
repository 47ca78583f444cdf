//! Helm's canonical install and uninstall ordering by kind

use crate::manifest::Document;

/// Kinds in the order Helm installs them; unknown kinds go last
pub const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

/// Position of `kind` in [`INSTALL_ORDER`]
pub fn install_rank(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(INSTALL_ORDER.len())
}

/// Stable sort by install rank; unknown kinds sort among themselves by name
pub fn sort_for_install(docs: &mut [Document]) {
    docs.sort_by(|a, b| {
        let (ra, rb) = (install_rank(a.kind()), install_rank(b.kind()));
        ra.cmp(&rb).then_with(|| {
            if ra == INSTALL_ORDER.len() {
                a.kind().cmp(b.kind())
            } else {
                std::cmp::Ordering::Equal
            }
        })
    });
}

/// Uninstall runs in exact reverse of install
pub fn sort_for_uninstall(docs: &mut [Document]) {
    sort_for_install(docs);
    docs.reverse();
}
