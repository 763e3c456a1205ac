use crate::model::{FilterPath, FilterTarget, ProcessedNode};

/// Applies path-based hierarchy filtering to nodes of one level
pub struct HierarchyFilterStage;

impl HierarchyFilterStage {
    /// Decide whether `node` stays, given the filter paths that apply to its level.
    ///
    /// `None` paths mean the level isn't filtered. A node that ends at least one
    /// path is a filter target and keeps all of its children. A node in the
    /// middle of a path is auto-expanded and passes the rest of the paths on.
    pub fn apply(mut node: ProcessedNode, paths: Option<&[FilterPath]>) -> Option<ProcessedNode> {
        let paths = match paths {
            None => return Some(node),
            Some(paths) => paths,
        };

        let mut remaining: Vec<FilterPath> = Vec::new();
        let mut is_target = false;
        for path in paths {
            let Some((first, rest)) = path.split_first() else {
                continue;
            };
            if !Self::matches(&node, first) {
                continue;
            }
            if rest.is_empty() {
                is_target = true;
            } else if !remaining.iter().any(|p| p.as_slice() == rest) {
                remaining.push(rest.to_vec());
            }
        }

        if is_target {
            node.set_filter_paths(None);
            return Some(node);
        }
        if remaining.is_empty() {
            return None;
        }

        node.set_filter_paths(Some(remaining));
        node.set_auto_expand(true);
        node.set_has_children(true);
        Some(node)
    }

    fn matches(node: &ProcessedNode, target: &FilterTarget) -> bool {
        match (node, target) {
            (ProcessedNode::Instances(n), FilterTarget::Instance(key)) => n.instance_keys.contains(key),
            (ProcessedNode::Generic(n), FilterTarget::Generic(id)) => &n.id == id,
            _ => false,
        }
    }
}
