//! Hook execution
//!
//! Hooks of one event run one at a time in weight order. Jobs and Pods are
//! awaited to completion; any other kind counts as done once applied.
//! Delete policies:
//! - `before-hook-creation`: the previous object is removed before applying
//! - `hook-succeeded` / `hook-failed`: the object is removed after the run

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::time::Duration;

use kubepack_core::{HookDeletePolicy, HookEvent, HookRecord};
use kubepack_core::release::HookExecution;
use kubepack_engine::Hook;
use kubepack_engine::manifest::split_documents;

use crate::error::{KubeError, Result};
use crate::resources::ResourceManager;

/// Outcome of a single hook
#[derive(Debug, Clone, PartialEq)]
pub struct HookRun {
    pub name: String,
    pub kind: String,
    pub execution: HookExecution,
}

/// Terminal state of a hook workload
#[derive(Debug, Clone, PartialEq, Eq)]
enum HookState {
    Running,
    Succeeded,
    Failed(String),
}

/// Runs hooks against a cluster
pub struct HookRunner {
    resources: ResourceManager,
    timeout: Duration,
    poll_interval: Duration,
}

impl HookRunner {
    pub fn new(resources: ResourceManager, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            resources,
            timeout,
            poll_interval,
        }
    }

    /// Run every hook bound to `event`, stopping at the first failure
    pub async fn run(&self, event: HookEvent, hooks: &[&Hook], namespace: &str) -> Result<Vec<HookRun>> {
        let mut runs = Vec::new();
        for hook in hooks.iter().filter(|h| h.has_event(event)) {
            tracing::info!(
                hook = %hook.document.name(),
                kind = %hook.document.kind(),
                event = %event,
                weight = hook.weight,
                "running hook"
            );
            runs.push(self.run_one(event, hook, namespace).await?);
        }
        Ok(runs)
    }

    async fn run_one(&self, event: HookEvent, hook: &Hook, namespace: &str) -> Result<HookRun> {
        let doc = &hook.document;
        let has_policy = |p: HookDeletePolicy| hook.delete_policies.contains(&p);

        if has_policy(HookDeletePolicy::BeforeHookCreation) {
            self.resources.delete_documents(&[doc], namespace).await?;
        }

        let started_at = Utc::now();
        let applied = self.resources.apply_object(&doc.object, namespace).await?;
        let outcome = self.await_completion(&applied, namespace).await;
        let completed_at = Utc::now();

        let (phase, cleanup) = match &outcome {
            Ok(()) => ("Succeeded", has_policy(HookDeletePolicy::HookSucceeded)),
            Err(_) => ("Failed", has_policy(HookDeletePolicy::HookFailed)),
        };
        if cleanup {
            if let Err(e) = self.resources.delete_documents(&[doc], namespace).await {
                tracing::warn!(hook = %doc.name(), error = %e, "failed to clean up hook");
            }
        }

        outcome.map_err(|message| KubeError::HookFailed {
            hook: doc.name().to_string(),
            event: event.to_string(),
            message,
        })?;

        Ok(HookRun {
            name: doc.name().to_string(),
            kind: doc.kind().to_string(),
            execution: HookExecution {
                started_at: Some(started_at),
                completed_at: Some(completed_at),
                phase: phase.to_string(),
            },
        })
    }

    /// Poll a Job or Pod until it finishes; errors are the failure message
    async fn await_completion(&self, applied: &JsonValue, namespace: &str) -> std::result::Result<(), String> {
        let kind = applied.get("kind").and_then(JsonValue::as_str).unwrap_or_default();
        let state = hook_state(kind, applied);
        if state != HookState::Running {
            return into_outcome(state);
        }

        let (mapping, prepared) = self
            .resources
            .prepare(applied, namespace)
            .await
            .map_err(|e| e.to_string())?;
        let name = crate::gateway::object_name(&prepared).to_string();
        let ns = crate::gateway::object_namespace(&prepared).map(str::to_string);
        let gateway = self.resources.gateway();

        let poll = async {
            loop {
                let current = gateway
                    .get(&mapping, ns.as_deref(), &name)
                    .await
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("{kind} {name} disappeared"))?;
                match hook_state(kind, &current) {
                    HookState::Running => tokio::time::sleep(self.poll_interval).await,
                    state => return into_outcome(state),
                }
            }
        };
        tokio::time::timeout(self.timeout, poll).await.map_err(|_| {
            format!(
                "timed out after {}",
                humantime::format_duration(self.timeout)
            )
        })?
    }
}

fn into_outcome(state: HookState) -> std::result::Result<(), String> {
    match state {
        HookState::Failed(message) => Err(message),
        _ => Ok(()),
    }
}

fn hook_state(kind: &str, object: &JsonValue) -> HookState {
    match kind {
        "Job" => {
            if true_condition(object, "Complete").is_some() {
                HookState::Succeeded
            } else if let Some(failed) = true_condition(object, "Failed") {
                HookState::Failed(
                    failed
                        .get("message")
                        .and_then(JsonValue::as_str)
                        .unwrap_or("job failed")
                        .to_string(),
                )
            } else {
                HookState::Running
            }
        }
        "Pod" => match object.pointer("/status/phase").and_then(JsonValue::as_str) {
            Some("Succeeded") => HookState::Succeeded,
            Some("Failed") => HookState::Failed("pod failed".to_string()),
            _ => HookState::Running,
        },
        _ => HookState::Succeeded,
    }
}

fn true_condition<'a>(object: &'a JsonValue, wanted: &str) -> Option<&'a JsonValue> {
    object
        .pointer("/status/conditions")
        .and_then(JsonValue::as_array)?
        .iter()
        .find(|c| {
            c.get("type").and_then(JsonValue::as_str) == Some(wanted)
                && c.get("status").and_then(JsonValue::as_str) == Some("True")
        })
}

/// Rebuild hooks from the records of a stored release
pub fn hooks_from_records(records: &[HookRecord]) -> Result<Vec<Hook>> {
    let mut hooks = Vec::new();
    for record in records {
        for document in split_documents(&record.path, &record.manifest)? {
            hooks.push(Hook {
                document,
                events: record.events.clone(),
                weight: record.weight,
                delete_policies: record.delete_policies.clone(),
            });
        }
    }
    kubepack_engine::hooks::sort_hooks(&mut hooks);
    Ok(hooks)
}

/// Store run outcomes on the matching records
pub fn record_runs(records: &mut [HookRecord], runs: &[HookRun]) {
    for run in runs {
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.name == run.name && r.kind == run.kind)
        {
            record.last_run = run.execution.clone();
        }
    }
}
