use crate::model::{union_instance_keys, FilterPath, Id, InstanceKey, ProcessingParams};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Stable integer handle the provider assigns to every distinct node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(pub u64);

/// Identity of a node among its siblings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKey {
    Instances(Vec<InstanceKey>),
    Generic(Id),
    Grouping(GroupingKind),
    Info(String),
}

/// Discriminant of a grouping node: two grouping nodes with equal kinds are the same group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GroupingKind {
    Class {
        class_name: String,
    },
    BaseClass {
        class_name: String,
    },
    PropertyValue {
        properties_class_name: String,
        property_name: String,
        formatted_value: String,
    },
    PropertyValueRange {
        properties_class_name: String,
        property_name: String,
        from_value: String,
        to_value: String,
    },
    PropertyOtherValues {
        properties_class_name: String,
        property_name: String,
    },
    Label {
        label: String,
        group_id: Option<String>,
    },
}

/// What has to match for two nodes to be merged into one
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergeIdentity {
    /// Sorted, de-duplicated class names of the node's instance keys
    Classes(Vec<String>),
    Generic(Id),
    Grouping(GroupingKind),
    Info(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFlags {
    /// `None` until known; resolved by a first-child request when needed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_children: Option<bool>,
    #[serde(default)]
    pub auto_expand: bool,
    #[serde(default)]
    pub supports_filtering: bool,
}

/// Node backed by one or more data-source rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesNode {
    pub label: String,
    pub instance_keys: Vec<InstanceKey>,
    #[serde(default)]
    pub processing: ProcessingParams,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
    /// Pre-computed children, when the source already knows them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ProcessedNode>>,
    #[serde(default)]
    pub parent_keys: Vec<NodeKey>,
    /// Remaining hierarchy filter paths for this node's children; `None` means unfiltered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_paths: Option<Vec<FilterPath>>,
    #[serde(skip)]
    pub handle: Option<NodeHandle>,
}

impl InstancesNode {
    pub fn new(label: impl Into<String>, instance_keys: Vec<InstanceKey>) -> Self {
        Self {
            label: label.into(),
            instance_keys,
            processing: ProcessingParams::None,
            flags: NodeFlags::default(),
            extended_data: None,
            children: None,
            parent_keys: Vec::new(),
            filter_paths: None,
            handle: None,
        }
    }

    /// Class of the first instance key; grouping by class looks at this one
    pub fn class_name(&self) -> Option<&str> {
        self.instance_keys.first().map(|k| k.class_name.as_str())
    }
}

/// Node with a caller-defined identity, not backed by instance keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericNode {
    pub id: Id,
    pub label: String,
    #[serde(default)]
    pub processing: ProcessingParams,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ProcessedNode>>,
    #[serde(default)]
    pub parent_keys: Vec<NodeKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_paths: Option<Vec<FilterPath>>,
    #[serde(skip)]
    pub handle: Option<NodeHandle>,
}

impl GenericNode {
    pub fn new(id: impl Into<Id>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            processing: ProcessingParams::None,
            flags: NodeFlags::default(),
            extended_data: None,
            children: None,
            parent_keys: Vec::new(),
            filter_paths: None,
            handle: None,
        }
    }
}

/// Class, base class, label or property grouping node. Children are always
/// materialized when the node is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingNode {
    pub kind: GroupingKind,
    pub label: String,
    pub children: Vec<ProcessedNode>,
    /// Every instance key found under this node
    pub grouped_instance_keys: Vec<InstanceKey>,
    #[serde(default)]
    pub auto_expand: bool,
    #[serde(default)]
    pub parent_keys: Vec<NodeKey>,
    #[serde(skip)]
    pub handle: Option<NodeHandle>,
    /// Level the group was built in, shared by every group of that level
    #[serde(skip)]
    pub origin: Option<Arc<LevelOrigin>>,
}

/// Where a level of grouping nodes came from, so the level can be built again
#[derive(Debug, Clone, PartialEq)]
pub enum LevelOrigin {
    Root,
    ChildrenOf(ProcessedNode),
}

impl LevelOrigin {
    pub fn new(parent: Option<&ProcessedNode>) -> Self {
        match parent {
            Some(parent) => LevelOrigin::ChildrenOf(parent.clone()),
            None => LevelOrigin::Root,
        }
    }

    pub fn parent(&self) -> Option<&ProcessedNode> {
        match self {
            LevelOrigin::Root => None,
            LevelOrigin::ChildrenOf(parent) => Some(parent),
        }
    }
}

/// Placeholder shown in place of a level that could not be loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoNode {
    pub message_key: String,
    pub message: String,
    #[serde(default)]
    pub parent_keys: Vec<NodeKey>,
}

pub const RESULT_SET_TOO_LARGE_KEY: &str = "result-set-too-large";
pub const BACKEND_TIMEOUT_KEY: &str = "backend-timeout";

impl InfoNode {
    pub fn result_set_too_large(limit: Option<usize>, parent_keys: Vec<NodeKey>) -> Self {
        let message = match limit {
            Some(limit) => format!("There are more than {} items at this level", limit),
            None => "There are too many items at this level".to_string(),
        };
        Self {
            message_key: RESULT_SET_TOO_LARGE_KEY.to_string(),
            message,
            parent_keys,
        }
    }

    pub fn backend_timeout(message: &str, parent_keys: Vec<NodeKey>) -> Self {
        Self {
            message_key: BACKEND_TIMEOUT_KEY.to_string(),
            message: format!("Loading this level timed out: {}", message),
            parent_keys,
        }
    }
}

/// A node as it flows through and out of the hierarchy pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessedNode {
    Instances(InstancesNode),
    Generic(GenericNode),
    Grouping(GroupingNode),
    Info(InfoNode),
}

impl ProcessedNode {
    pub fn key(&self) -> NodeKey {
        match self {
            ProcessedNode::Instances(n) => NodeKey::Instances(n.instance_keys.clone()),
            ProcessedNode::Generic(n) => NodeKey::Generic(n.id.clone()),
            ProcessedNode::Grouping(n) => NodeKey::Grouping(n.kind.clone()),
            ProcessedNode::Info(n) => NodeKey::Info(n.message_key.clone()),
        }
    }

    pub fn merge_identity(&self) -> MergeIdentity {
        match self {
            ProcessedNode::Instances(n) => MergeIdentity::Classes(
                n.instance_keys
                    .iter()
                    .map(|k| k.class_name.clone())
                    .sorted()
                    .dedup()
                    .collect(),
            ),
            ProcessedNode::Generic(n) => MergeIdentity::Generic(n.id.clone()),
            ProcessedNode::Grouping(n) => MergeIdentity::Grouping(n.kind.clone()),
            ProcessedNode::Info(n) => MergeIdentity::Info(n.message_key.clone()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ProcessedNode::Instances(n) => &n.label,
            ProcessedNode::Generic(n) => &n.label,
            ProcessedNode::Grouping(n) => &n.label,
            ProcessedNode::Info(n) => &n.message,
        }
    }

    pub fn processing(&self) -> &ProcessingParams {
        const NONE: &ProcessingParams = &ProcessingParams::None;
        match self {
            ProcessedNode::Instances(n) => &n.processing,
            ProcessedNode::Generic(n) => &n.processing,
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => NONE,
        }
    }

    pub fn set_processing(&mut self, processing: ProcessingParams) {
        match self {
            ProcessedNode::Instances(n) => n.processing = processing,
            ProcessedNode::Generic(n) => n.processing = processing,
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => {}
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.processing().is_hidden()
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, ProcessedNode::Grouping(_))
    }

    /// `Some(true)` for grouping nodes, `Some(false)` for info nodes
    pub fn has_children(&self) -> Option<bool> {
        match self {
            ProcessedNode::Instances(n) => n.flags.has_children,
            ProcessedNode::Generic(n) => n.flags.has_children,
            ProcessedNode::Grouping(n) => Some(!n.children.is_empty()),
            ProcessedNode::Info(_) => Some(false),
        }
    }

    pub fn set_has_children(&mut self, value: bool) {
        match self {
            ProcessedNode::Instances(n) => n.flags.has_children = Some(value),
            ProcessedNode::Generic(n) => n.flags.has_children = Some(value),
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => {}
        }
    }

    pub fn auto_expand(&self) -> bool {
        match self {
            ProcessedNode::Instances(n) => n.flags.auto_expand,
            ProcessedNode::Generic(n) => n.flags.auto_expand,
            ProcessedNode::Grouping(n) => n.auto_expand,
            ProcessedNode::Info(_) => false,
        }
    }

    pub fn set_auto_expand(&mut self, value: bool) {
        match self {
            ProcessedNode::Instances(n) => n.flags.auto_expand = value,
            ProcessedNode::Generic(n) => n.flags.auto_expand = value,
            ProcessedNode::Grouping(n) => n.auto_expand = value,
            ProcessedNode::Info(_) => {}
        }
    }

    pub fn supports_filtering(&self) -> bool {
        match self {
            ProcessedNode::Instances(n) => n.flags.supports_filtering,
            ProcessedNode::Generic(n) => n.flags.supports_filtering,
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => false,
        }
    }

    pub fn extended_data(&self) -> Option<&Map<String, Value>> {
        match self {
            ProcessedNode::Instances(n) => n.extended_data.as_ref(),
            ProcessedNode::Generic(n) => n.extended_data.as_ref(),
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => None,
        }
    }

    /// Instance keys of the node itself, or every key grouped under a grouping node
    pub fn instance_keys(&self) -> &[InstanceKey] {
        match self {
            ProcessedNode::Instances(n) => &n.instance_keys,
            ProcessedNode::Grouping(n) => &n.grouped_instance_keys,
            ProcessedNode::Generic(_) | ProcessedNode::Info(_) => &[],
        }
    }

    /// Children known without running a query
    pub fn precomputed_children(&self) -> Option<&[ProcessedNode]> {
        match self {
            ProcessedNode::Instances(n) => n.children.as_deref(),
            ProcessedNode::Generic(n) => n.children.as_deref(),
            ProcessedNode::Grouping(n) => Some(&n.children),
            ProcessedNode::Info(_) => Some(&[]),
        }
    }

    pub fn take_precomputed_children(&mut self) -> Option<Vec<ProcessedNode>> {
        match self {
            ProcessedNode::Instances(n) => n.children.take(),
            ProcessedNode::Generic(n) => n.children.take(),
            ProcessedNode::Grouping(n) => Some(std::mem::take(&mut n.children)),
            ProcessedNode::Info(_) => None,
        }
    }

    pub fn parent_keys(&self) -> &[NodeKey] {
        match self {
            ProcessedNode::Instances(n) => &n.parent_keys,
            ProcessedNode::Generic(n) => &n.parent_keys,
            ProcessedNode::Grouping(n) => &n.parent_keys,
            ProcessedNode::Info(n) => &n.parent_keys,
        }
    }

    pub fn set_parent_keys(&mut self, parent_keys: Vec<NodeKey>) {
        match self {
            ProcessedNode::Instances(n) => n.parent_keys = parent_keys,
            ProcessedNode::Generic(n) => n.parent_keys = parent_keys,
            ProcessedNode::Grouping(n) => n.parent_keys = parent_keys,
            ProcessedNode::Info(n) => n.parent_keys = parent_keys,
        }
    }

    /// Parent keys for this node's children
    pub fn child_parent_keys(&self) -> Vec<NodeKey> {
        let mut keys = self.parent_keys().to_vec();
        keys.push(self.key());
        keys
    }

    pub fn filter_paths(&self) -> Option<&[FilterPath]> {
        match self {
            ProcessedNode::Instances(n) => n.filter_paths.as_deref(),
            ProcessedNode::Generic(n) => n.filter_paths.as_deref(),
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => None,
        }
    }

    pub fn set_filter_paths(&mut self, paths: Option<Vec<FilterPath>>) {
        match self {
            ProcessedNode::Instances(n) => n.filter_paths = paths,
            ProcessedNode::Generic(n) => n.filter_paths = paths,
            ProcessedNode::Grouping(_) | ProcessedNode::Info(_) => {}
        }
    }

    pub fn handle(&self) -> Option<NodeHandle> {
        match self {
            ProcessedNode::Instances(n) => n.handle,
            ProcessedNode::Generic(n) => n.handle,
            ProcessedNode::Grouping(n) => n.handle,
            ProcessedNode::Info(_) => None,
        }
    }

    pub fn set_handle(&mut self, handle: NodeHandle) {
        match self {
            ProcessedNode::Instances(n) => n.handle = Some(handle),
            ProcessedNode::Generic(n) => n.handle = Some(handle),
            ProcessedNode::Grouping(n) => n.handle = Some(handle),
            ProcessedNode::Info(_) => {}
        }
    }

    /// Canonical text of the node's position in the hierarchy, used for interning
    pub fn identity(&self) -> String {
        serde_json::json!({ "parents": self.parent_keys(), "key": self.key() }).to_string()
    }
}

impl From<InstancesNode> for ProcessedNode {
    fn from(node: InstancesNode) -> Self {
        ProcessedNode::Instances(node)
    }
}

impl From<GenericNode> for ProcessedNode {
    fn from(node: GenericNode) -> Self {
        ProcessedNode::Generic(node)
    }
}

impl From<GroupingNode> for ProcessedNode {
    fn from(node: GroupingNode) -> Self {
        ProcessedNode::Grouping(node)
    }
}

/// Collect instance keys of `nodes` (and of grouping nodes' grouped keys) without duplicates
pub fn collect_instance_keys<'a>(nodes: impl IntoIterator<Item = &'a ProcessedNode>) -> Vec<InstanceKey> {
    let mut keys = Vec::new();
    for node in nodes {
        union_instance_keys(&mut keys, node.instance_keys().iter().cloned());
    }
    keys
}
