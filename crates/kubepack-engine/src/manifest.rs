//! Splitting rendered templates into Kubernetes documents

use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};

/// One YAML document from a rendered template
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Chart-qualified template path, e.g. `stash/templates/deployment.yaml`
    pub source: String,

    /// The document text, without separators
    pub content: String,

    /// Parsed form of `content`
    pub object: JsonValue,
}

impl Document {
    pub fn api_version(&self) -> &str {
        str_at(&self.object, "/apiVersion")
    }

    pub fn kind(&self) -> &str {
        str_at(&self.object, "/kind")
    }

    pub fn name(&self) -> &str {
        str_at(&self.object, "/metadata/name")
    }

    /// `metadata.namespace`, if set
    pub fn namespace(&self) -> Option<&str> {
        self.object
            .pointer("/metadata/namespace")
            .and_then(JsonValue::as_str)
            .filter(|ns| !ns.is_empty())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.object
            .pointer("/metadata/annotations")
            .and_then(|a| a.get(key))
            .and_then(JsonValue::as_str)
    }

    /// API group; empty for the core group
    pub fn group(&self) -> &str {
        split_api_version(self.api_version()).0
    }

    /// Whether this is a `*List` object carrying `items`
    pub fn is_list(&self) -> bool {
        self.kind().ends_with("List") && self.object.get("items").is_some_and(JsonValue::is_array)
    }

    /// The object itself, or each element of a list kind
    pub fn objects(&self) -> Vec<&JsonValue> {
        if self.is_list() {
            self.object
                .get("items")
                .and_then(JsonValue::as_array)
                .map(|items| items.iter().collect())
                .unwrap_or_default()
        } else {
            vec![&self.object]
        }
    }
}

fn str_at<'a>(value: &'a JsonValue, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(JsonValue::as_str).unwrap_or_default()
}

/// Split `apps/v1` into (`apps`, `v1`) and `v1` into (``, `v1`)
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Split a rendered template into documents
///
/// Empty documents and documents that are only comments are dropped.
/// Every kept document must be a mapping with `apiVersion` and `kind`.
pub fn split_documents(source: &str, rendered: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for chunk in split_yaml_stream(rendered) {
        let content = chunk.trim_matches('\n');
        let has_body = content
            .lines()
            .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'));
        if !has_body {
            continue;
        }

        let object: JsonValue =
            serde_yaml::from_str(content).map_err(|e| EngineError::InvalidManifest {
                template: source.to_string(),
                message: e.to_string(),
            })?;
        if object.is_null() {
            continue;
        }
        if !object.is_object() || object.get("kind").is_none() || object.get("apiVersion").is_none()
        {
            return Err(EngineError::InvalidManifest {
                template: source.to_string(),
                message: "document is missing apiVersion or kind".to_string(),
            });
        }

        documents.push(Document {
            source: source.to_string(),
            content: content.to_string(),
            object,
        });
    }

    Ok(documents)
}

/// Split on lines that consist of `---` (optionally followed by a comment)
fn split_yaml_stream(stream: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in stream.lines() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            chunks.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    chunks.push(current);
    chunks
}

/// Join documents into a release manifest with `# Source:` headers
pub fn join_manifest<'a>(docs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (source, content) in docs {
        out.push_str("---\n# Source: ");
        out.push_str(source);
        out.push('\n');
        out.push_str(content);
        out.push('\n');
    }
    out
}

/// Parse a joined release manifest back into documents
pub fn parse_manifest(manifest: &str) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for chunk in split_yaml_stream(manifest) {
        let mut source = "manifest";
        let mut body = String::with_capacity(chunk.len());
        for line in chunk.lines() {
            match line.strip_prefix("# Source: ") {
                Some(path) => source = path,
                None => {
                    body.push_str(line);
                    body.push('\n');
                }
            }
        }
        documents.extend(split_documents(source, &body)?);
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = r#"
# leading comment only
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: stash
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: stash
  namespace: kube-system
  annotations:
    helm.sh/hook: pre-install
"#;

    #[test]
    fn test_split_drops_empty_documents() {
        let docs = split_documents("stash/templates/all.yaml", RENDERED).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind(), "ServiceAccount");
        assert_eq!(docs[0].group(), "");
        assert_eq!(docs[0].namespace(), None);
        assert_eq!(docs[1].group(), "apps");
        assert_eq!(docs[1].namespace(), Some("kube-system"));
        assert_eq!(docs[1].annotation("helm.sh/hook"), Some("pre-install"));
    }

    #[test]
    fn test_rejects_non_objects() {
        let err = split_documents("x/templates/bad.yaml", "just: text\n").unwrap_err();
        assert!(matches!(err, EngineError::InvalidManifest { .. }));
    }

    #[test]
    fn test_list_objects() {
        let docs = split_documents(
            "x/templates/list.yaml",
            "apiVersion: v1\nkind: ConfigMapList\nitems:\n- {apiVersion: v1, kind: ConfigMap, metadata: {name: a}}\n- {apiVersion: v1, kind: ConfigMap, metadata: {name: b}}\n",
        )
        .unwrap();
        assert!(docs[0].is_list());
        assert_eq!(docs[0].objects().len(), 2);
    }

    #[test]
    fn test_manifest_round_trip() {
        let docs = split_documents("stash/templates/all.yaml", RENDERED).unwrap();
        let manifest = join_manifest(docs.iter().map(|d| (d.source.as_str(), d.content.as_str())));
        assert!(manifest.starts_with("---\n# Source: stash/templates/all.yaml\n"));

        let back = parse_manifest(&manifest).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].object, docs[1].object);
        assert_eq!(back[1].content, docs[1].content);
        assert_eq!(back[1].source, "stash/templates/all.yaml");
    }
}
