use crate::config::ConcurrencyConfig;
use crate::error::HierarchyResult;
use crate::logic::grouping::GroupingEngine;
use crate::logic::hide_promote::{promote_hidden, HiddenChildrenSource, PromoteMode};
use crate::logic::hierarchy_filter::HierarchyFilterStage;
use crate::logic::merge::MergeReducer;
use crate::logic::node_source::{NodeSource, SourceContext};
use crate::logic::NodeStream;
use crate::model::{FilterPath, ProcessedNode};
use futures::{future, StreamExt, TryStreamExt};
use log::debug;
use std::sync::Arc;

/// Builds one hierarchy level:
/// 1. read raw nodes from the hierarchy definition
/// 2. apply the hierarchy filter
/// 3. replace hidden nodes with their children
/// 4. group
/// 5. merge equal siblings
#[derive(Clone)]
pub struct LevelPipeline {
    source: NodeSource,
    grouping: GroupingEngine,
    concurrency: ConcurrencyConfig,
}

impl LevelPipeline {
    pub fn new(source: NodeSource, grouping: GroupingEngine, concurrency: ConcurrencyConfig) -> Self {
        Self {
            source,
            grouping,
            concurrency,
        }
    }

    /// Every node of the level under `parent`. `filter_paths` restrict the level
    /// (`None` is unfiltered).
    pub async fn level(
        &self,
        parent: Option<ProcessedNode>,
        filter_paths: Option<Vec<FilterPath>>,
        context: Arc<SourceContext>,
    ) -> HierarchyResult<Vec<ProcessedNode>> {
        let parent_keys = parent
            .as_ref()
            .map(|p| p.child_parent_keys())
            .unwrap_or_default();

        let visible: Vec<ProcessedNode> = self
            .visible_nodes(parent, filter_paths, context.clone(), PromoteMode::Full)
            .try_collect()
            .await?;
        debug!(
            "Level has {} visible nodes from {} rows",
            visible.len(),
            context.limiter.produced()
        );

        let grouped = self.grouping.group(visible, &parent_keys).await?;
        Ok(MergeReducer::merge_siblings(grouped))
    }

    /// Whether `parent` has at least one visible child. Stops reading at the
    /// first one.
    pub async fn has_visible_child(&self, parent: ProcessedNode, context: Arc<SourceContext>) -> HierarchyResult<bool> {
        let filter_paths = parent.filter_paths().map(|p| p.to_vec());
        let mut children = self.visible_nodes(Some(parent), filter_paths, context, PromoteMode::FirstChild);
        match children.next().await {
            Some(Ok(_)) => Ok(true),
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }

    fn visible_nodes(
        &self,
        parent: Option<ProcessedNode>,
        filter_paths: Option<Vec<FilterPath>>,
        context: Arc<SourceContext>,
        mode: PromoteMode,
    ) -> NodeStream {
        let raw = filtered(self.source.read(parent, context.clone()), filter_paths);
        let hidden = Arc::new(HiddenLevel {
            source: self.source.clone(),
            context,
        });
        promote_hidden(raw, hidden, mode, self.concurrency.hidden_levels)
    }
}

/// Children of hidden nodes, read with the same context as the level that hides them
struct HiddenLevel {
    source: NodeSource,
    context: Arc<SourceContext>,
}

impl HiddenChildrenSource for HiddenLevel {
    fn children_of(&self, parent: ProcessedNode) -> NodeStream {
        let filter_paths = parent.filter_paths().map(|p| p.to_vec());
        filtered(self.source.read(Some(parent), self.context.clone()), filter_paths)
    }
}

fn filtered(nodes: NodeStream, filter_paths: Option<Vec<FilterPath>>) -> NodeStream {
    if filter_paths.is_none() {
        return nodes;
    }
    Box::pin(nodes.try_filter_map(move |node| {
        future::ready(Ok(HierarchyFilterStage::apply(node, filter_paths.as_deref())))
    }))
}
