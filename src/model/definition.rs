use crate::model::{GenericNode, Id, NodeFlags, ProcessedNode, ProcessingParams};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Query text plus the values bound to it. The text is opaque to the hierarchy
/// pipeline; only the query executor interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<QueryBinding>,
}

impl QueryDefinition {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.push(QueryBinding {
            name: name.into(),
            value,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBinding {
    pub name: String,
    pub value: Value,
}

/// Query producing instance nodes of `full_class_name` (or its subclasses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNodesQuery {
    pub full_class_name: String,
    pub query: QueryDefinition,
}

/// Node that does not come from a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNodeDefinition {
    pub id: Id,
    pub label: String,
    #[serde(default)]
    pub processing: ProcessingParams,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
}

impl GenericNodeDefinition {
    pub fn new(id: impl Into<Id>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            processing: ProcessingParams::None,
            flags: NodeFlags::default(),
            extended_data: None,
        }
    }

    pub fn into_node(self) -> ProcessedNode {
        let mut node = GenericNode::new(self.id, self.label);
        node.processing = self.processing;
        node.flags = self.flags;
        node.extended_data = self.extended_data;
        ProcessedNode::Generic(node)
    }
}

/// One entry returned by the hierarchy-level definition for a parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LevelDefinition {
    Instances(InstanceNodesQuery),
    Generic(GenericNodeDefinition),
}

impl LevelDefinition {
    pub fn instances(full_class_name: impl Into<String>, query: QueryDefinition) -> Self {
        LevelDefinition::Instances(InstanceNodesQuery {
            full_class_name: full_class_name.into(),
            query,
        })
    }

    pub fn generic(definition: GenericNodeDefinition) -> Self {
        LevelDefinition::Generic(definition)
    }
}
