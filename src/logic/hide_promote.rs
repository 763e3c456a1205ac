use crate::logic::merge::MergeReducer;
use crate::logic::NodeStream;
use crate::model::{MergeIdentity, ProcessedNode};
use futures::stream;
use futures::{StreamExt, TryStreamExt};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Where the hide/promote operator gets the raw children of a hidden node from.
/// Returned children may be hidden themselves; the operator promotes them too.
pub trait HiddenChildrenSource: Send + Sync {
    fn children_of(&self, parent: ProcessedNode) -> NodeStream;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteMode {
    /// Replace every hidden node with all of its children
    Full,
    /// Only the first visible child matters. A hidden node known to have
    /// children stands in for them.
    FirstChild,
}

/// Replace hidden nodes in `input` with their children.
///
/// Visible nodes stream through as they arrive. Hidden nodes with pre-computed
/// children are replaced in place. All other hidden nodes are collected until
/// the input ends, merged by identity and loaded with one child request per
/// identity, at most `concurrency` at a time, in order of first encounter.
pub fn promote_hidden(
    input: NodeStream,
    children: Arc<dyn HiddenChildrenSource>,
    mode: PromoteMode,
    concurrency: usize,
) -> NodeStream {
    Box::pin(async_stream::stream! {
        let mut input = input;
        let mut pending: Vec<Option<ProcessedNode>> = Vec::new();
        let mut positions: HashMap<MergeIdentity, usize> = HashMap::new();

        while let Some(node) = input.next().await {
            let mut node = match node {
                Ok(node) => node,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            if !node.is_hidden() {
                yield Ok(node);
                continue;
            }
            match node.has_children() {
                Some(false) => continue,
                Some(true) if mode == PromoteMode::FirstChild => {
                    yield Ok(node);
                    continue;
                }
                _ => {}
            }

            if let Some(precomputed) = node.take_precomputed_children() {
                let mut inline = promote_hidden(
                    Box::pin(stream::iter(precomputed.into_iter().map(Ok))),
                    children.clone(),
                    mode,
                    concurrency,
                );
                while let Some(child) = inline.next().await {
                    let failed = child.is_err();
                    yield child;
                    if failed {
                        return;
                    }
                }
                continue;
            }

            let identity = node.merge_identity();
            match positions.get(&identity) {
                Some(&index) => {
                    pending[index] = match pending[index].take() {
                        Some(existing) => Some(MergeReducer::merge(existing, node)),
                        None => Some(node),
                    };
                }
                None => {
                    positions.insert(identity, pending.len());
                    pending.push(Some(node));
                }
            }
        }

        let hidden: Vec<ProcessedNode> = pending.into_iter().flatten().collect();
        if hidden.is_empty() {
            return;
        }
        debug!("Promoting children of {} hidden nodes", hidden.len());

        let source = children.clone();
        let mut levels = stream::iter(hidden)
            .map(move |node| {
                let raw = source.children_of(node);
                let promoted = promote_hidden(raw, source.clone(), mode, concurrency);
                promoted.try_collect::<Vec<ProcessedNode>>()
            })
            .buffered(concurrency.max(1));

        while let Some(level) = levels.next().await {
            match level {
                Ok(nodes) => {
                    for node in nodes {
                        yield Ok(node);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HierarchyError;
    use crate::model::{GenericNode, InstanceKey, InstancesNode, ProcessingParams};
    use parking_lot::Mutex;

    /// Children by parent label
    #[derive(Default)]
    struct MapSource {
        children: HashMap<String, Vec<ProcessedNode>>,
        requests: Mutex<Vec<ProcessedNode>>,
    }

    impl MapSource {
        fn with(mut self, parent: &str, children: Vec<ProcessedNode>) -> Self {
            self.children.insert(parent.to_string(), children);
            self
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl HiddenChildrenSource for MapSource {
        fn children_of(&self, parent: ProcessedNode) -> NodeStream {
            let children = self.children.get(parent.label()).cloned();
            self.requests.lock().push(parent);
            match children {
                Some(children) => Box::pin(stream::iter(children.into_iter().map(Ok))),
                None => Box::pin(stream::iter(vec![Err(HierarchyError::Unknown(
                    "no children registered".to_string(),
                ))])),
            }
        }
    }

    fn visible(class: &str, id: &str) -> ProcessedNode {
        InstancesNode::new(id, vec![InstanceKey::new(class, id)]).into()
    }

    fn hidden(class: &str, id: &str) -> ProcessedNode {
        let mut node = visible(class, id);
        node.set_processing(ProcessingParams::HideInHierarchy);
        node
    }

    fn input(nodes: Vec<ProcessedNode>) -> NodeStream {
        Box::pin(stream::iter(nodes.into_iter().map(Ok)))
    }

    async fn run(nodes: Vec<ProcessedNode>, source: Arc<MapSource>, mode: PromoteMode) -> Vec<String> {
        promote_hidden(input(nodes), source, mode, 4)
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .iter()
            .map(|n| n.label().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_hidden_node_is_replaced_by_its_children() {
        let source = Arc::new(MapSource::default().with("h", vec![visible("X", "x1"), visible("X", "x2")]));
        let labels = run(vec![hidden("H", "h")], source.clone(), PromoteMode::Full).await;
        assert_eq!(labels, vec!["x1", "x2"]);
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_hidden_chains_collapse_to_the_same_level() {
        // h1 -> h2 -> h3 -> {a, b} looks the same as a single hidden level
        let chained = Arc::new(
            MapSource::default()
                .with("h1", vec![hidden("H", "h2")])
                .with("h2", vec![hidden("H", "h3")])
                .with("h3", vec![visible("X", "a"), visible("X", "b")]),
        );
        let single = Arc::new(MapSource::default().with("h1", vec![visible("X", "a"), visible("X", "b")]));

        let deep = run(vec![visible("V", "v"), hidden("H", "h1")], chained.clone(), PromoteMode::Full).await;
        let flat = run(vec![visible("V", "v"), hidden("H", "h1")], single, PromoteMode::Full).await;
        assert_eq!(deep, flat);
        assert_eq!(chained.request_count(), 3);
    }

    #[tokio::test]
    async fn test_hidden_nodes_of_one_identity_share_a_request() {
        let source = Arc::new(
            MapSource::default()
                .with("h1", vec![visible("X", "x1")])
                .with("g", vec![visible("Y", "y1")]),
        );
        let mut generic = GenericNode::new("g", "g");
        generic.processing = ProcessingParams::HideInHierarchy;

        let labels = run(
            vec![hidden("H", "h1"), generic.into(), hidden("H", "h2")],
            source.clone(),
            PromoteMode::Full,
        )
        .await;
        assert_eq!(labels, vec!["x1", "y1"]);
        assert_eq!(source.request_count(), 2);

        let merged = source.requests.lock()[0].clone();
        assert_eq!(merged.instance_keys().len(), 2);
    }

    #[tokio::test]
    async fn test_precomputed_children_are_emitted_in_place() {
        let source = Arc::new(MapSource::default().with("inner", vec![visible("X", "deep")]));
        let mut node = InstancesNode::new("outer", vec![InstanceKey::new("H", "outer")]);
        node.processing = ProcessingParams::HideInHierarchy;
        node.children = Some(vec![visible("X", "first"), hidden("H", "inner")]);

        let labels = run(vec![node.into(), visible("V", "last")], source.clone(), PromoteMode::Full).await;
        assert_eq!(labels, vec!["first", "deep", "last"]);
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_childless_hidden_nodes_are_dropped() {
        let source = Arc::new(MapSource::default());
        let mut node = hidden("H", "h");
        node.set_has_children(false);
        let labels = run(vec![node, visible("V", "v")], source.clone(), PromoteMode::Full).await;
        assert_eq!(labels, vec!["v"]);
        assert_eq!(source.request_count(), 0);
    }

    #[tokio::test]
    async fn test_first_child_mode_uses_known_children_flag() {
        let source = Arc::new(MapSource::default());
        let mut node = hidden("H", "h");
        node.set_has_children(true);
        let labels = run(vec![node], source.clone(), PromoteMode::FirstChild).await;
        assert_eq!(labels, vec!["h"]);
        assert_eq!(source.request_count(), 0);
    }

    #[tokio::test]
    async fn test_child_request_errors_end_the_stream() {
        let source = Arc::new(MapSource::default());
        let results: Vec<_> = promote_hidden(input(vec![hidden("H", "missing")]), source, PromoteMode::Full, 2)
            .collect()
            .await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(HierarchyError::Unknown(_))));
    }
}
