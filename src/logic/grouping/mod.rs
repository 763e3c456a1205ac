pub mod base_class;
pub mod property;
pub mod trie;

pub use base_class::base_class_chain;
pub use trie::GroupingTrie;

use crate::error::HierarchyResult;
use crate::model::{GroupingKind, GroupingOptions, GroupingSpec, NodeKey, ProcessedNode};
use crate::store::class_cache::ClassHierarchyCache;
use log::debug;
use std::sync::Arc;

/// Extended data entry separating label groups that share a label
pub const LABEL_GROUP_ID_KEY: &str = "groupId";

/// One level of a node's grouping path
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStep {
    pub kind: GroupingKind,
    pub label: String,
    pub options: GroupingOptions,
}

/// Groups the visible nodes of one level
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    classes: Arc<ClassHierarchyCache>,
}

impl GroupingEngine {
    pub fn new(classes: Arc<ClassHierarchyCache>) -> Self {
        Self { classes }
    }

    /// Arrange `nodes` under grouping nodes. Every node lands exactly once in the
    /// result, at the end of its grouping path; nodes without one stay at the top
    /// level. Group and node order follows first encounter.
    pub async fn group(&self, nodes: Vec<ProcessedNode>, parent_keys: &[NodeKey]) -> HierarchyResult<Vec<ProcessedNode>> {
        let mut trie = GroupingTrie::new();
        let mut grouped = 0;

        for node in nodes {
            let path = match node.processing().grouping() {
                Some(spec) => self.path(&node, spec).await?,
                None => Vec::new(),
            };
            if !path.is_empty() {
                grouped += 1;
            }
            trie.insert(path, node);
        }

        if grouped > 0 {
            debug!("Grouped {} nodes", grouped);
        }
        Ok(trie.into_nodes(parent_keys))
    }

    /// Grouping path of one node: base classes (or its class), then property
    /// levels, then label
    pub async fn path(&self, node: &ProcessedNode, spec: &GroupingSpec) -> HierarchyResult<Vec<GroupStep>> {
        let mut steps = Vec::new();
        let class_name = match node {
            ProcessedNode::Instances(n) => n.class_name().map(str::to_string),
            _ => None,
        };

        if let Some(class_name) = class_name.as_deref() {
            let mut base_class_applied = false;
            if let Some(by_base) = &spec.by_base_classes {
                let chain = base_class_chain(&self.classes, class_name, &by_base.full_class_names).await?;
                base_class_applied = !chain.is_empty();
                for base in chain {
                    let class = self.classes.resolve(&base).await?;
                    steps.push(GroupStep {
                        kind: GroupingKind::BaseClass { class_name: base },
                        label: class.label,
                        options: by_base.options,
                    });
                }
            }

            if let (Some(options), false) = (spec.by_class, base_class_applied) {
                let class = self.classes.resolve(class_name).await?;
                steps.push(GroupStep {
                    kind: GroupingKind::Class {
                        class_name: class_name.to_string(),
                    },
                    label: class.label,
                    options,
                });
            }

            if let Some(by_properties) = &spec.by_properties {
                if self
                    .classes
                    .is_derived_from(class_name, &by_properties.properties_class_name)
                    .await?
                {
                    steps.extend(property::property_steps(by_properties));
                }
            }
        }

        if let Some(by_label) = &spec.by_label {
            let group_id = node
                .extended_data()
                .and_then(|data| data.get(LABEL_GROUP_ID_KEY))
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .or_else(|| by_label.group_id.clone());
            steps.push(GroupStep {
                kind: GroupingKind::Label {
                    label: node.label().to_string(),
                    group_id,
                },
                label: node.label().to_string(),
                options: by_label.options,
            });
        }

        Ok(steps)
    }
}
