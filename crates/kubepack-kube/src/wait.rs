//! `kubectl wait` for readiness clauses
//!
//! Targets are a named object, a label selector or every object of the
//! resource in the release namespace. Exit rules follow kubectl:
//! - a condition wait on a missing named object fails right away
//! - a condition wait whose selector matches nothing fails right away
//! - a delete wait is met once nothing matches

use serde_json::Value as JsonValue;
use std::time::Duration;

use kubepack_core::{WaitCondition, WaitFlags};

use crate::error::{KubeError, Result};
use crate::gateway::{ClusterGateway, ResourceMapping, object_name};

/// Block until `flags` is satisfied in `namespace` or its timeout expires
pub async fn wait_for(
    gateway: &dyn ClusterGateway,
    flags: &WaitFlags,
    namespace: &str,
    poll_interval: Duration,
) -> Result<()> {
    let condition = flags.condition()?;
    let mapping = gateway.resolve_resource(&flags.resource).await?;
    let timeout = flags.effective_timeout();
    let what = describe(flags, namespace);
    tracing::info!(wait = %what, timeout = %humantime::format_duration(timeout), "waiting");

    let poll = async {
        let mut first = true;
        loop {
            let targets = targets(gateway, &mapping, flags, namespace).await?;
            let done = match &condition {
                WaitCondition::Delete => targets.is_empty(),
                WaitCondition::Condition { .. } => {
                    if targets.is_empty() && first {
                        return Err(KubeError::NotFound {
                            kind: mapping.kind.clone(),
                            name: flags
                                .resource_name
                                .clone()
                                .unwrap_or_else(|| "no matching resources found".to_string()),
                            namespace: mapping.scope(Some(namespace)).map(str::to_string),
                        });
                    }
                    !targets.is_empty() && targets.iter().all(|t| condition.is_met(t))
                }
            };
            if done {
                return Ok(());
            }
            first = false;
            tokio::time::sleep(poll_interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .map_err(|_| KubeError::Timeout { what, after: timeout })?
}

async fn targets(
    gateway: &dyn ClusterGateway,
    mapping: &ResourceMapping,
    flags: &WaitFlags,
    namespace: &str,
) -> Result<Vec<JsonValue>> {
    let namespace = Some(namespace);
    if let Some(name) = &flags.resource_name {
        return Ok(gateway.get(mapping, namespace, name).await?.into_iter().collect());
    }
    let objects = gateway
        .list(mapping, namespace, flags.selector.as_deref())
        .await?;
    Ok(objects
        .into_iter()
        .filter(|o| !object_name(o).is_empty())
        .collect())
}

/// `deployments.apps --all --for=condition=Available in cert-manager`
fn describe(flags: &WaitFlags, namespace: &str) -> String {
    let target = match (&flags.resource_name, &flags.selector) {
        (Some(name), _) => format!("{}/{name}", flags.resource),
        (None, Some(selector)) => format!("{} -l {selector}", flags.resource),
        (None, None) => format!("{} --all", flags.resource),
    };
    format!("{target} --for={} in {namespace}", flags.for_condition)
}
