use crate::error::{HierarchyError, HierarchyResult};
use crate::model::{union_instance_keys, FilterPath, NodeFlags, NodeKey, ProcessedNode};
use std::collections::HashMap;

/// Combines nodes of equal grouping identity
pub struct MergeReducer;

impl MergeReducer {
    /// Merge `b` into `a`.
    ///
    /// # Panics
    ///
    /// When the nodes have different grouping identities. That only happens when the
    /// grouping engine mixed up its groups, so there's nothing sensible to recover to.
    pub fn merge(a: ProcessedNode, b: ProcessedNode) -> ProcessedNode {
        match Self::try_merge(a, b) {
            Ok(node) => node,
            Err(err) => panic!("{}", err),
        }
    }

    /// Merge `b` into `a`: instance keys are unioned, `has_children` and `auto_expand`
    /// are OR-ed, label, processing params and extended data come from `a`.
    pub fn try_merge(a: ProcessedNode, b: ProcessedNode) -> HierarchyResult<ProcessedNode> {
        let (left, right) = (a.merge_identity(), b.merge_identity());
        if left != right {
            return Err(HierarchyError::MergeIdentityMismatch {
                left: format!("{:?}", left),
                right: format!("{:?}", right),
            });
        }

        let merged = match (a, b) {
            (ProcessedNode::Instances(mut a), ProcessedNode::Instances(b)) => {
                union_instance_keys(&mut a.instance_keys, b.instance_keys);
                a.flags = merge_flags(&a.flags, &b.flags);
                a.children = merge_children(a.children, b.children);
                a.filter_paths = merge_filter_paths(a.filter_paths, b.filter_paths);
                a.handle = None;
                ProcessedNode::Instances(a)
            }
            (ProcessedNode::Generic(mut a), ProcessedNode::Generic(b)) => {
                a.flags = merge_flags(&a.flags, &b.flags);
                a.children = merge_children(a.children, b.children);
                a.filter_paths = merge_filter_paths(a.filter_paths, b.filter_paths);
                a.handle = None;
                ProcessedNode::Generic(a)
            }
            (ProcessedNode::Grouping(mut a), ProcessedNode::Grouping(b)) => {
                union_instance_keys(&mut a.grouped_instance_keys, b.grouped_instance_keys);
                a.children.extend(b.children);
                a.children = Self::merge_siblings(std::mem::take(&mut a.children));
                a.auto_expand |= b.auto_expand;
                a.handle = None;
                ProcessedNode::Grouping(a)
            }
            (a @ ProcessedNode::Info(_), ProcessedNode::Info(_)) => a,
            // Equal identities imply equal variants
            (a, b) => {
                return Err(HierarchyError::MergeIdentityMismatch {
                    left: format!("{:?}", a.key()),
                    right: format!("{:?}", b.key()),
                })
            }
        };
        Ok(merged)
    }

    /// Collapse siblings that are the same node (same key) into one, keeping the
    /// position of the first occurrence. Grouping nodes' children are collapsed too.
    pub fn merge_siblings(nodes: Vec<ProcessedNode>) -> Vec<ProcessedNode> {
        let mut result: Vec<ProcessedNode> = Vec::with_capacity(nodes.len());
        let mut positions: HashMap<NodeKey, usize> = HashMap::new();

        for mut node in nodes {
            if let ProcessedNode::Grouping(group) = &mut node {
                group.children = Self::merge_siblings(std::mem::take(&mut group.children));
            }

            let key = sibling_key(&node);
            match positions.get(&key) {
                Some(&index) => {
                    let existing = std::mem::replace(&mut result[index], placeholder());
                    result[index] = Self::merge(existing, node);
                }
                None => {
                    positions.insert(key, result.len());
                    result.push(node);
                }
            }
        }
        result
    }
}

/// Instance keys compared as a set
fn sibling_key(node: &ProcessedNode) -> NodeKey {
    match node.key() {
        NodeKey::Instances(mut keys) => {
            keys.sort();
            keys.dedup();
            NodeKey::Instances(keys)
        }
        key => key,
    }
}

fn placeholder() -> ProcessedNode {
    ProcessedNode::Info(crate::model::InfoNode {
        message_key: String::new(),
        message: String::new(),
        parent_keys: Vec::new(),
    })
}

fn merge_flags(a: &NodeFlags, b: &NodeFlags) -> NodeFlags {
    let has_children = match (a.has_children, b.has_children) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    };
    NodeFlags {
        has_children,
        auto_expand: a.auto_expand || b.auto_expand,
        supports_filtering: a.supports_filtering || b.supports_filtering,
    }
}

/// Pre-computed children survive only if both sides have them
fn merge_children(
    a: Option<Vec<ProcessedNode>>,
    b: Option<Vec<ProcessedNode>>,
) -> Option<Vec<ProcessedNode>> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(MergeReducer::merge_siblings(a))
        }
        _ => None,
    }
}

/// An unfiltered side makes the merged node unfiltered
fn merge_filter_paths(
    a: Option<Vec<FilterPath>>,
    b: Option<Vec<FilterPath>>,
) -> Option<Vec<FilterPath>> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            for path in b {
                if !a.contains(&path) {
                    a.push(path);
                }
            }
            Some(a)
        }
        _ => None,
    }
}
