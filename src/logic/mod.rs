pub mod grouping;
pub mod hide_promote;
pub mod hierarchy_filter;
pub mod merge;
pub mod node_source;
pub mod pagination;
pub mod pipeline;
pub mod provider;

pub use grouping::{GroupStep, GroupingEngine, LABEL_GROUP_ID_KEY};
pub use hide_promote::{promote_hidden, HiddenChildrenSource, PromoteMode};
pub use hierarchy_filter::HierarchyFilterStage;
pub use merge::MergeReducer;
pub use node_source::{NodeSource, RowConverter, SourceContext};
pub use pagination::{PageSlice, Paginator, RowLimiter};
pub use pipeline::LevelPipeline;
pub use provider::{HierarchyProvider, NodesStream};

use crate::error::HierarchyResult;
use crate::model::ProcessedNode;
use futures::stream::BoxStream;

/// Nodes flowing between pipeline stages
pub type NodeStream = BoxStream<'static, HierarchyResult<ProcessedNode>>;
