use crate::error::HierarchyError;
use crate::logic::pagination::RowLimiter;
use crate::logic::NodeStream;
use crate::model::{
    columns, GroupingSpec, HierarchyVariables, InstanceFilter, InstanceKey, InstanceNodesQuery,
    InstancesNode, LevelDefinition, NodeFlags, ProcessedNode, ProcessingParams, Row,
};
use crate::store::traits::{HierarchyDefinition, QueryExecutor};
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;

/// Everything a level's queries share
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub variables: HierarchyVariables,
    pub instance_filter: Option<InstanceFilter>,
    pub limiter: RowLimiter,
}

impl SourceContext {
    pub fn new(variables: HierarchyVariables, instance_filter: Option<InstanceFilter>, limiter: RowLimiter) -> Self {
        Self {
            variables,
            instance_filter,
            limiter,
        }
    }
}

/// Turns the hierarchy-level definition of a parent into a stream of raw nodes
#[derive(Clone)]
pub struct NodeSource {
    definition: Arc<dyn HierarchyDefinition>,
    executor: Arc<dyn QueryExecutor>,
}

impl NodeSource {
    pub fn new(definition: Arc<dyn HierarchyDefinition>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { definition, executor }
    }

    /// Raw children of `parent` (the root level for `None`), in definition order and
    /// then row order. Definition failures end the stream with a `Definition` error.
    pub fn read(&self, parent: Option<ProcessedNode>, context: Arc<SourceContext>) -> NodeStream {
        let definition = self.definition.clone();
        let executor = self.executor.clone();

        Box::pin(async_stream::stream! {
            let definitions = match definition
                .define_children(parent.as_ref(), &context.variables)
                .await
            {
                Ok(definitions) => definitions,
                Err(err) => {
                    yield Err(HierarchyError::definition(err));
                    return;
                }
            };
            debug!(
                "Parent {:?} defines {} child sources",
                parent.as_ref().map(|p| p.label().to_string()),
                definitions.len()
            );

            for level_definition in definitions {
                let query = match level_definition {
                    LevelDefinition::Generic(generic) => {
                        yield Ok(generic.into_node());
                        continue;
                    }
                    LevelDefinition::Instances(query) => query,
                };

                let rows = match executor
                    .execute(&query.query, context.instance_filter.as_ref())
                    .await
                {
                    Ok(rows) => rows,
                    Err(err) => {
                        yield Err(HierarchyError::from(err));
                        return;
                    }
                };

                let mut rows = context.limiter.guard(rows);
                while let Some(row) = rows.next().await {
                    match row {
                        Ok(row) => {
                            if let Some(node) = RowConverter::to_node(&row, &query) {
                                yield Ok(node);
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Reads raw instance nodes out of query rows
pub struct RowConverter;

impl RowConverter {
    /// `None` when a required column is missing; the row is reported and skipped
    pub fn to_node(row: &Row, query: &InstanceNodesQuery) -> Option<ProcessedNode> {
        let missing = row.missing_columns();
        if !missing.is_empty() {
            warn!(
                "Skipping row of query for '{}': missing columns {:?}",
                query.full_class_name, missing
            );
            return None;
        }

        let class_name = row.get_str(columns::CLASS_NAME)?;
        let id = row.get_id(columns::ID)?;
        let label = row
            .get(columns::LABEL)
            .map(|v| match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            })
            .unwrap_or_default();

        let mut node = InstancesNode::new(label, vec![InstanceKey::new(class_name, id)]);
        node.processing = Self::processing(row);
        node.flags = NodeFlags {
            has_children: row.get_bool(columns::HAS_CHILDREN),
            auto_expand: row.get_bool(columns::AUTO_EXPAND).unwrap_or(false),
            supports_filtering: row.get_bool(columns::SUPPORTS_FILTERING).unwrap_or(false),
        };
        node.extended_data = row
            .get(columns::EXTENDED_DATA)
            .and_then(|v| v.as_object())
            .cloned();

        Some(ProcessedNode::Instances(node))
    }

    fn processing(row: &Row) -> ProcessingParams {
        if row.get_bool(columns::HIDE_IN_HIERARCHY).unwrap_or(false) {
            return ProcessingParams::HideInHierarchy;
        }

        let Some(grouping) = row.get(columns::GROUPING) else {
            return ProcessingParams::None;
        };

        // Some executors hand JSON columns out as text
        let parsed = match grouping.as_str() {
            Some(text) => serde_json::from_str::<GroupingSpec>(text),
            None => serde_json::from_value::<GroupingSpec>(grouping.clone()),
        };
        match parsed {
            Ok(spec) if spec.is_empty() => ProcessingParams::None,
            Ok(spec) => ProcessingParams::Grouping(spec),
            Err(err) => {
                warn!("Ignoring malformed grouping column: {}", err);
                ProcessingParams::None
            }
        }
    }
}
