use crate::error::QueryError;
use crate::model::{ClassInfo, HierarchyVariables, InstanceFilter, LevelDefinition, ProcessedNode, QueryDefinition, Row};
use anyhow::Result;
use futures::stream::BoxStream;

/// Rows as they come out of the query executor
pub type RowStream = BoxStream<'static, Result<Row, QueryError>>;

/// Runs instance node queries. Rows are pulled lazily; dropping the stream stops
/// the query.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &QueryDefinition,
        instance_filter: Option<&InstanceFilter>,
    ) -> std::result::Result<RowStream, QueryError>;
}

/// Answers class hierarchy questions about the data source schema
#[async_trait::async_trait]
pub trait ClassHierarchyInspector: Send + Sync {
    /// Whether `class_name` is `base_class_name` or derives from it
    async fn is_derived_from(
        &self,
        class_name: &str,
        base_class_name: &str,
    ) -> std::result::Result<bool, QueryError>;

    async fn get_class(&self, class_name: &str) -> std::result::Result<ClassInfo, QueryError>;
}

/// Tells what children a node has, as a list of queries and generic nodes.
/// Supplied by the caller per use case.
#[async_trait::async_trait]
pub trait HierarchyDefinition: Send + Sync {
    /// `parent` is `None` for the root level
    async fn define_children(
        &self,
        parent: Option<&ProcessedNode>,
        variables: &HierarchyVariables,
    ) -> Result<Vec<LevelDefinition>>;
}

/// Notification that data behind the hierarchy changed; cached levels are stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChangeEvent {
    /// What changed, for diagnostics only
    pub source: String,
}

impl DataChangeEvent {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}
