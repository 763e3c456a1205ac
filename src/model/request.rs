use crate::model::{InstanceFilter, NodeHandle, ProcessedNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Variables snapshot passed to the hierarchy-level definition. Ordered so that
/// serializing it is canonical.
pub type HierarchyVariables = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageWindow {
    pub start: usize,
    pub size: usize,
}

impl PageWindow {
    pub fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }
}

/// Arguments of a `get_nodes` call
#[derive(Debug, Clone, Default)]
pub struct GetNodesRequest {
    /// `None` requests the root level
    pub parent: Option<ProcessedNode>,
    pub page: Option<PageWindow>,
    pub instance_filter: Option<InstanceFilter>,
    /// Overrides the configured row ceiling for this request
    pub size_limit: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl GetNodesRequest {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn children_of(parent: ProcessedNode) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, start: usize, size: usize) -> Self {
        self.page = Some(PageWindow::new(start, size));
        self
    }

    pub fn with_instance_filter(mut self, filter: InstanceFilter) -> Self {
        self.instance_filter = Some(filter);
        self
    }

    pub fn with_size_limit(mut self, limit: usize) -> Self {
        self.size_limit = Some(limit);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What a cached execution produces: the whole level, or a page of it with
/// children flags resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Level,
    Nodes,
}

/// Structural key of a hierarchy request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestKey {
    pub kind: RequestKind,
    /// `None` for the root level
    pub parent: Option<NodeHandle>,
    pub page: Option<PageWindow>,
    pub instance_filter: Option<InstanceFilter>,
    pub variables: HierarchyVariables,
    pub size_limit: Option<usize>,
}

impl RequestKey {
    /// Same request without the page window, i.e. the whole level
    pub fn level(&self) -> RequestKey {
        RequestKey {
            kind: RequestKind::Level,
            page: None,
            ..self.clone()
        }
    }

    /// SHA-256 of the key's canonical JSON form
    pub fn canonical(&self) -> String {
        use sha2::{Digest, Sha256};

        // Struct fields serialize in declaration order and variables are a BTreeMap,
        // so equal keys always produce the same text
        let text = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(variables: HierarchyVariables) -> RequestKey {
        RequestKey {
            kind: RequestKind::Nodes,
            parent: Some(NodeHandle(7)),
            page: Some(PageWindow::new(0, 10)),
            instance_filter: None,
            variables,
            size_limit: Some(100),
        }
    }

    #[test]
    fn test_canonical_key_ignores_variable_insertion_order() {
        let mut a = HierarchyVariables::new();
        a.insert("x".to_string(), json!(1));
        a.insert("y".to_string(), json!("two"));

        let mut b = HierarchyVariables::new();
        b.insert("y".to_string(), json!("two"));
        b.insert("x".to_string(), json!(1));

        assert_eq!(key(a.clone()).canonical(), key(b).canonical());

        a.insert("x".to_string(), json!(2));
        let mut c = HierarchyVariables::new();
        c.insert("x".to_string(), json!(1));
        c.insert("y".to_string(), json!("two"));
        assert_ne!(key(a).canonical(), key(c).canonical());
    }

    #[test]
    fn test_level_key_drops_page() {
        let nodes_key = key(HierarchyVariables::new());
        let level_key = nodes_key.level();
        assert_eq!(level_key.kind, RequestKind::Level);
        assert_eq!(level_key.page, None);
        assert_eq!(level_key.parent, nodes_key.parent);
        assert_ne!(level_key.canonical(), nodes_key.canonical());
    }
}
