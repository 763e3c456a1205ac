use crate::model::{HierarchyVariables, LevelDefinition, ProcessedNode};
use crate::store::traits::HierarchyDefinition;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ChildrenRule =
    Arc<dyn Fn(&ProcessedNode, &HierarchyVariables) -> Result<Vec<LevelDefinition>> + Send + Sync>;

/// Hierarchy definition made of fixed rules: a root level, children per instance
/// node class, and children per generic node id.
#[derive(Default)]
pub struct StaticDefinition {
    root: Vec<LevelDefinition>,
    by_class: HashMap<String, ChildrenRule>,
    by_generic_id: HashMap<String, ChildrenRule>,
    calls: AtomicUsize,
}

impl StaticDefinition {
    pub fn new(root: Vec<LevelDefinition>) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    /// Children of instance nodes whose (first) class is `class_name`
    pub fn with_class_children<F>(mut self, class_name: &str, rule: F) -> Self
    where
        F: Fn(&ProcessedNode, &HierarchyVariables) -> Result<Vec<LevelDefinition>> + Send + Sync + 'static,
    {
        self.by_class.insert(class_name.to_string(), Arc::new(rule));
        self
    }

    /// Children of the generic node with id `id`
    pub fn with_generic_children<F>(mut self, id: &str, rule: F) -> Self
    where
        F: Fn(&ProcessedNode, &HierarchyVariables) -> Result<Vec<LevelDefinition>> + Send + Sync + 'static,
    {
        self.by_generic_id.insert(id.to_string(), Arc::new(rule));
        self
    }

    /// Number of `define_children` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HierarchyDefinition for StaticDefinition {
    async fn define_children(
        &self,
        parent: Option<&ProcessedNode>,
        variables: &HierarchyVariables,
    ) -> Result<Vec<LevelDefinition>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let rule = match parent {
            None => return Ok(self.root.clone()),
            Some(ProcessedNode::Instances(node)) => node
                .class_name()
                .and_then(|class_name| self.by_class.get(class_name)),
            Some(ProcessedNode::Generic(node)) => self.by_generic_id.get(&node.id),
            Some(ProcessedNode::Grouping(_)) | Some(ProcessedNode::Info(_)) => None,
        };

        match (rule, parent) {
            (Some(rule), Some(parent)) => rule(parent, variables),
            _ => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for StaticDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticDefinition")
            .field("root", &self.root)
            .field("classes", &self.by_class.keys().collect::<Vec<_>>())
            .field("generic_ids", &self.by_generic_id.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ids of the parent's instance keys as a JSON array, for binding in child queries
pub fn parent_instance_ids(parent: &ProcessedNode) -> Value {
    Value::Array(
        parent
            .instance_keys()
            .iter()
            .map(|key| Value::String(key.id.clone()))
            .collect(),
    )
}
