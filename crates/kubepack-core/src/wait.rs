//! Readiness predicates with `kubectl wait` semantics

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Timeout used when a clause sets zero or a negative value (one week, like kubectl)
pub const UNBOUNDED_WAIT: Duration = Duration::from_secs(168 * 60 * 60);

/// A resource type, optionally qualified by API group
///
/// Serialized as `resource.group`; any form [`FromStr`] accepts is read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl FromStr for GroupResource {
    type Err = CoreError;

    /// Accepts `apps/deployments`, `deployments.apps` and bare `pods`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::MissingField {
                field: "resource".to_string(),
            });
        }
        if let Some((group, resource)) = s.split_once('/') {
            return Ok(Self::new(group, resource));
        }
        match s.split_once('.') {
            Some((resource, group)) => Ok(Self::new(group, resource)),
            None => Ok(Self::new("", s)),
        }
    }
}

impl Serialize for GroupResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupResource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// A readiness clause attached to a chart version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitFlags {
    #[serde(rename = "resourceGroup")]
    pub resource: GroupResource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,

    /// Label selector in kubectl syntax (`app=stash,tier!=db`)
    #[serde(
        default,
        rename = "labelSelector",
        skip_serializing_if = "Option::is_none"
    )]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,

    /// Zero when unset or not positive
    #[serde(default, with = "signed_timeout")]
    pub timeout: Duration,

    /// `delete` or `condition=<Name>[=<value>]`
    pub for_condition: String,
}

impl WaitFlags {
    /// Timeout with zero (unset or not positive) mapped to [`UNBOUNDED_WAIT`]
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            UNBOUNDED_WAIT
        } else {
            self.timeout
        }
    }

    /// Parse the condition and check that a target is named
    pub fn condition(&self) -> Result<WaitCondition> {
        if self.resource_name.is_none() && self.selector.is_none() && !self.all {
            return Err(CoreError::MissingField {
                field: format!(
                    "resourceName, labelSelector or all for wait on {}",
                    self.resource
                ),
            });
        }
        self.for_condition.parse()
    }

    /// kubectl arguments equivalent to this clause (without `kubectl wait`)
    pub fn kubectl_args(&self, namespace: &str) -> Vec<String> {
        let mut args = Vec::new();
        match &self.resource_name {
            Some(name) => args.push(format!("{}/{}", self.resource, name)),
            None => args.push(self.resource.to_string()),
        }
        if let Some(selector) = &self.selector {
            args.push(format!("--selector={selector}"));
        }
        if self.all {
            args.push("--all".to_string());
        }
        args.push(format!("--namespace={namespace}"));
        args.push(format!("--for={}", self.for_condition));
        args.push(format!(
            "--timeout={}s",
            self.effective_timeout().as_secs()
        ));
        args
    }
}

/// Timeouts as humantime strings or whole seconds; values at or below zero read as zero
mod signed_timeout {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        humantime_serde::serialize(timeout, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(u64::try_from(secs).unwrap_or(0))),
            Raw::Text(text) => {
                let text = text.trim();
                let (negative, magnitude) = match text.strip_prefix('-') {
                    Some(rest) => (true, rest.trim_start()),
                    None => (false, text.strip_prefix('+').unwrap_or(text)),
                };
                let duration = humantime::parse_duration(magnitude).map_err(de::Error::custom)?;
                Ok(if negative { Duration::ZERO } else { duration })
            }
        }
    }
}

/// Parsed `--for` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Wait until the objects are gone
    Delete,
    /// Wait until `status.conditions[type=name].status == value`
    Condition { name: String, value: String },
}

impl FromStr for WaitCondition {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("delete") {
            return Ok(Self::Delete);
        }
        let Some(rest) = s.strip_prefix("condition=") else {
            return Err(CoreError::InvalidWaitCondition {
                condition: s.to_string(),
            });
        };
        let (name, value) = match rest.split_once('=') {
            Some((name, value)) => (name, value),
            None => (rest, "True"),
        };
        if name.is_empty() {
            return Err(CoreError::InvalidWaitCondition {
                condition: s.to_string(),
            });
        }
        Ok(Self::Condition {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

impl WaitCondition {
    /// Whether an object currently satisfies the condition
    ///
    /// Conditions compare case-insensitively. A condition that reports an
    /// `observedGeneration` older than `metadata.generation` is stale and
    /// does not count. `Delete` is never satisfied by an existing object.
    pub fn is_met(&self, object: &JsonValue) -> bool {
        let Self::Condition { name, value } = self else {
            return false;
        };

        let generation = object.pointer("/metadata/generation").and_then(JsonValue::as_i64);
        let Some(conditions) = object
            .pointer("/status/conditions")
            .and_then(JsonValue::as_array)
        else {
            return false;
        };

        conditions.iter().any(|c| {
            let type_matches = c
                .get("type")
                .and_then(JsonValue::as_str)
                .is_some_and(|t| t.eq_ignore_ascii_case(name));
            let status_matches = c
                .get("status")
                .and_then(JsonValue::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case(value));
            let fresh = match (
                generation,
                c.get("observedGeneration").and_then(JsonValue::as_i64),
            ) {
                (Some(generation), Some(observed)) => observed >= generation,
                _ => true,
            };
            type_matches && status_matches && fresh
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_resource_forms() {
        assert_eq!(
            "apps/deployments".parse::<GroupResource>().unwrap(),
            GroupResource::new("apps", "deployments")
        );
        assert_eq!(
            "deployments.apps".parse::<GroupResource>().unwrap(),
            GroupResource::new("apps", "deployments")
        );
        assert_eq!(
            "pods".parse::<GroupResource>().unwrap(),
            GroupResource::new("", "pods")
        );
        assert_eq!(GroupResource::new("apps", "deployments").to_string(), "deployments.apps");
    }

    #[test]
    fn test_parse_condition() {
        assert_eq!("delete".parse::<WaitCondition>().unwrap(), WaitCondition::Delete);
        assert_eq!(
            "condition=Available".parse::<WaitCondition>().unwrap(),
            WaitCondition::Condition {
                name: "Available".to_string(),
                value: "True".to_string()
            }
        );
        assert_eq!(
            "condition=Ready=false".parse::<WaitCondition>().unwrap(),
            WaitCondition::Condition {
                name: "Ready".to_string(),
                value: "false".to_string()
            }
        );
        assert!("jsonpath={.status}".parse::<WaitCondition>().is_err());
        assert!("condition=".parse::<WaitCondition>().is_err());
    }

    #[test]
    fn test_zero_timeout_is_a_week() {
        let flags = WaitFlags::default();
        assert_eq!(flags.effective_timeout(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_requires_target() {
        let flags = WaitFlags {
            resource: GroupResource::new("apps", "deployments"),
            for_condition: "condition=Available".to_string(),
            ..Default::default()
        };
        assert!(flags.condition().is_err());

        let flags = WaitFlags { all: true, ..flags };
        assert!(flags.condition().is_ok());
    }

    #[test]
    fn test_condition_met() {
        let cond: WaitCondition = "condition=available".parse().unwrap();

        let ready = json!({
            "metadata": {"generation": 2},
            "status": {"conditions": [{"type": "Available", "status": "True", "observedGeneration": 2}]}
        });
        let stale = json!({
            "metadata": {"generation": 3},
            "status": {"conditions": [{"type": "Available", "status": "True", "observedGeneration": 2}]}
        });
        let progressing = json!({
            "status": {"conditions": [{"type": "Available", "status": "False"}]}
        });

        assert!(cond.is_met(&ready));
        assert!(!cond.is_met(&stale));
        assert!(!cond.is_met(&progressing));
        assert!(!WaitCondition::Delete.is_met(&ready));
    }

    #[test]
    fn test_yaml_timeout() {
        let flags: WaitFlags = serde_yaml::from_str(
            "resourceGroup: apps/deployments\nall: true\ntimeout: 5m\nforCondition: condition=Available\n",
        )
        .unwrap();
        assert_eq!(flags.timeout, Duration::from_secs(300));
        assert_eq!(
            flags.kubectl_args("cert-manager"),
            vec![
                "deployments.apps",
                "--all",
                "--namespace=cert-manager",
                "--for=condition=Available",
                "--timeout=300s"
            ]
        );
    }

    #[test]
    fn test_yaml_clause_fields() {
        let flags: WaitFlags = serde_yaml::from_str(
            "resourceGroup: deployments.apps\nlabelSelector: app=stash\nforCondition: condition=Available\ntimeout: 5m\n",
        )
        .unwrap();
        assert_eq!(flags.resource, GroupResource::new("apps", "deployments"));
        assert_eq!(flags.selector.as_deref(), Some("app=stash"));
        assert!(flags.condition().is_ok());

        let yaml = serde_yaml::to_string(&flags).unwrap();
        assert!(yaml.contains("resourceGroup: deployments.apps"));
        assert!(yaml.contains("labelSelector: app=stash"));
        assert_eq!(serde_yaml::from_str::<WaitFlags>(&yaml).unwrap(), flags);
    }

    #[test]
    fn test_non_positive_timeout_is_a_week() {
        let parse = |timeout: &str| {
            let yaml = format!("resourceGroup: pods\nall: true\nforCondition: delete\n{timeout}");
            serde_yaml::from_str::<WaitFlags>(&yaml).unwrap().effective_timeout()
        };
        assert_eq!(parse("timeout: -1s\n"), UNBOUNDED_WAIT);
        assert_eq!(parse("timeout: 0s\n"), UNBOUNDED_WAIT);
        assert_eq!(parse("timeout: -30\n"), UNBOUNDED_WAIT);
        assert_eq!(parse(""), UNBOUNDED_WAIT);
        assert_eq!(parse("timeout: 90\n"), Duration::from_secs(90));
        assert!(
            serde_yaml::from_str::<WaitFlags>("resourceGroup: pods\nforCondition: delete\ntimeout: soon\n")
                .is_err()
        );
    }
}
