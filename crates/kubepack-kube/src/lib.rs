//! Kubepack Kube - the cluster side of kubepack
//!
//! This crate provides:
//! - **Cluster gateway**: a narrow trait over the Kubernetes API, backed by kube-rs or an in-memory mock
//! - **Release storage**: Helm-compatible release Secrets, optionally mirrored into Application objects
//! - **Realizer**: installs, upgrades and uninstalls orders, and writes equivalent shell scripts
//! - **Hooks**: Helm hook execution with weights and delete policies
//! - **Permission audit**: SelfSubjectAccessReviews for everything an order would create
//! - **Applications**: `app.k8s.io/v1beta1` Application objects describing releases

pub mod application;
pub mod auditor;
pub mod error;
pub mod gateway;
pub mod hooks;
pub mod realizer;
pub mod resources;
pub mod script;
pub mod storage;
pub mod wait;

pub use application::ApplicationAggregator;
pub use auditor::{AuditEntry, AuditReport, PermissionAuditor};
pub use error::{KubeError, Result};
pub use gateway::{
    ClusterGateway, KubeGateway, MockGateway, ResourceAttributes, ResourceMapping,
};
pub use hooks::{HookRun, HookRunner};
pub use realizer::{
    InstallReport, RealizeOptions, Realizer, ReleaseReport, RemovedRelease, Step, UninstallReport,
};
pub use resources::{ObjectKey, OperationSummary, ResourceManager};
pub use script::{ScriptRefs, ScriptWriter};
pub use storage::{
    ApplicationsDriver, DriverKind, MemoryDriver, SecretsDriver, StorageDriver,
};
pub use wait::wait_for;
