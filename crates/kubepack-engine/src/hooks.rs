//! Hook annotations

use kubepack_core::{HookDeletePolicy, HookEvent, HookRecord};

use crate::manifest::Document;
use crate::sort::install_rank;

pub const HOOK_ANNOTATION: &str = "helm.sh/hook";
pub const HOOK_WEIGHT_ANNOTATION: &str = "helm.sh/hook-weight";
pub const HOOK_DELETE_POLICY_ANNOTATION: &str = "helm.sh/hook-delete-policy";

/// A rendered hook resource
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    pub document: Document,
    pub events: Vec<HookEvent>,
    pub weight: i32,
    pub delete_policies: Vec<HookDeletePolicy>,
}

impl TryFrom<Document> for Hook {
    type Error = Document;

    /// Parse hook annotations, handing the document back when it is not a hook
    ///
    /// Unknown events are ignored; a hook whose events are all unknown is
    /// not a hook. Hooks without a delete policy get `before-hook-creation`.
    fn try_from(document: Document) -> Result<Self, Document> {
        let events: Vec<HookEvent> = document
            .annotation(HOOK_ANNOTATION)
            .map(|a| a.split(',').filter_map(HookEvent::parse).collect())
            .unwrap_or_default();
        if events.is_empty() {
            return Err(document);
        }

        let weight = document
            .annotation(HOOK_WEIGHT_ANNOTATION)
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(0);

        let mut delete_policies: Vec<HookDeletePolicy> = document
            .annotation(HOOK_DELETE_POLICY_ANNOTATION)
            .map(|p| p.split(',').filter_map(HookDeletePolicy::parse).collect())
            .unwrap_or_default();
        if delete_policies.is_empty() {
            delete_policies.push(HookDeletePolicy::BeforeHookCreation);
        }

        Ok(Self {
            document,
            events,
            weight,
            delete_policies,
        })
    }
}

impl Hook {
    pub fn has_event(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn is_test(&self) -> bool {
        self.has_event(HookEvent::Test)
    }

    /// Release record form
    pub fn to_record(&self) -> HookRecord {
        HookRecord {
            name: self.document.name().to_string(),
            kind: self.document.kind().to_string(),
            path: self.document.source.clone(),
            manifest: self.document.content.clone(),
            events: self.events.clone(),
            last_run: Default::default(),
            weight: self.weight,
            delete_policies: self.delete_policies.clone(),
        }
    }
}

/// Sort hooks by weight, then kind install order, then name
pub fn sort_hooks(hooks: &mut [Hook]) {
    hooks.sort_by(|a, b| {
        a.weight
            .cmp(&b.weight)
            .then_with(|| install_rank(a.document.kind()).cmp(&install_rank(b.document.kind())))
            .then_with(|| a.document.name().cmp(b.document.name()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::split_documents;

    fn doc(annotations: &str) -> Document {
        let yaml = format!(
            "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  annotations:\n{annotations}"
        );
        split_documents("app/templates/job.yaml", &yaml).unwrap().remove(0)
    }

    #[test]
    fn test_parse_hook() {
        let hook = Hook::try_from(doc(
            "    helm.sh/hook: pre-install,pre-upgrade\n    helm.sh/hook-weight: \"-5\"\n    helm.sh/hook-delete-policy: hook-succeeded\n",
        ))
        .unwrap();
        assert_eq!(hook.events, vec![HookEvent::PreInstall, HookEvent::PreUpgrade]);
        assert_eq!(hook.weight, -5);
        assert_eq!(hook.delete_policies, vec![HookDeletePolicy::HookSucceeded]);

        let record = hook.to_record();
        assert_eq!(record.name, "migrate");
        assert_eq!(record.path, "app/templates/job.yaml");
    }

    #[test]
    fn test_default_delete_policy() {
        let hook = Hook::try_from(doc("    helm.sh/hook: post-install\n")).unwrap();
        assert_eq!(hook.delete_policies, vec![HookDeletePolicy::BeforeHookCreation]);
        assert!(!hook.is_test());
    }

    #[test]
    fn test_not_a_hook() {
        assert!(Hook::try_from(doc("    team: data\n")).is_err());
        let back = Hook::try_from(doc("    helm.sh/hook: crd-install\n")).unwrap_err();
        assert_eq!(back.name(), "migrate");
    }

    #[test]
    fn test_sort_by_weight() {
        let mut hooks = vec![
            Hook::try_from(doc("    helm.sh/hook: pre-install\n    helm.sh/hook-weight: \"5\"\n")).unwrap(),
            Hook::try_from(doc("    helm.sh/hook: pre-install\n    helm.sh/hook-weight: \"-1\"\n")).unwrap(),
        ];
        sort_hooks(&mut hooks);
        assert_eq!(hooks[0].weight, -1);
    }
}
