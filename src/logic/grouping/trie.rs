use crate::logic::grouping::GroupStep;
use crate::model::{collect_instance_keys, GroupingKind, GroupingNode, GroupingOptions, NodeKey, ProcessedNode};
use std::collections::HashMap;

enum Entry {
    Leaf(ProcessedNode),
    Group(Group),
}

struct Group {
    kind: GroupingKind,
    label: String,
    /// From the first node that created the group
    options: GroupingOptions,
    entries: Vec<Entry>,
    index: HashMap<GroupingKind, usize>,
}

impl Group {
    fn root() -> Self {
        Self {
            kind: GroupingKind::Label {
                label: String::new(),
                group_id: None,
            },
            label: String::new(),
            options: GroupingOptions::default(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn child(&mut self, step: GroupStep) -> &mut Group {
        let existing = self.index.get(&step.kind).copied();
        let position = match existing {
            Some(position) => position,
            None => {
                let position = self.entries.len();
                self.index.insert(step.kind.clone(), position);
                self.entries.push(Entry::Group(Group {
                    kind: step.kind,
                    label: step.label,
                    options: step.options,
                    entries: Vec::new(),
                    index: HashMap::new(),
                }));
                position
            }
        };
        match &mut self.entries[position] {
            Entry::Group(group) => group,
            Entry::Leaf(_) => unreachable!("group index points at a leaf"),
        }
    }
}

/// Prefix-sharing tree of grouping paths. Groups and leaves keep the order in
/// which they were first reached.
pub struct GroupingTrie {
    root: Group,
}

impl Default for GroupingTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupingTrie {
    pub fn new() -> Self {
        Self { root: Group::root() }
    }

    pub fn insert(&mut self, path: Vec<GroupStep>, node: ProcessedNode) {
        let mut group = &mut self.root;
        for step in path {
            group = group.child(step);
        }
        group.entries.push(Entry::Leaf(node));
    }

    /// Build the level's nodes, with `parent_keys` as the keys of the level's parent
    pub fn into_nodes(self, parent_keys: &[NodeKey]) -> Vec<ProcessedNode> {
        let mut nodes = materialize(self.root.entries);
        assign_parent_keys(&mut nodes, parent_keys);
        nodes
    }
}

fn materialize(entries: Vec<Entry>) -> Vec<ProcessedNode> {
    let only_child = entries.len() == 1;
    let mut nodes = Vec::with_capacity(entries.len());

    for entry in entries {
        let group = match entry {
            Entry::Leaf(node) => {
                nodes.push(node);
                continue;
            }
            Entry::Group(group) => group,
        };

        let children = materialize(group.entries);
        if (only_child && group.options.hide_if_no_siblings)
            || (children.len() == 1 && group.options.hide_if_one_grouped_node)
        {
            nodes.extend(children);
            continue;
        }

        let auto_expand = children
            .iter()
            .any(|c| c.filter_paths().is_some() || (c.is_grouping() && c.auto_expand()));
        nodes.push(
            GroupingNode {
                kind: group.kind,
                label: group.label,
                grouped_instance_keys: collect_instance_keys(&children),
                children,
                auto_expand,
                parent_keys: Vec::new(),
                handle: None,
                origin: None,
            }
            .into(),
        );
    }
    nodes
}

fn assign_parent_keys(nodes: &mut [ProcessedNode], parent_keys: &[NodeKey]) {
    for node in nodes {
        node.set_parent_keys(parent_keys.to_vec());
        if let ProcessedNode::Grouping(group) = node {
            let mut child_keys = parent_keys.to_vec();
            child_keys.push(NodeKey::Grouping(group.kind.clone()));
            assign_parent_keys(&mut group.children, &child_keys);
        }
    }
}
