pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export the provider and its pipeline stages
pub use logic::{
    promote_hidden, GroupingEngine, HierarchyFilterStage, HierarchyProvider, LevelPipeline,
    MergeReducer, NodeSource, NodeStream, NodesStream, Paginator, PromoteMode, RowLimiter,
};

// Export all model types
pub use model::*;

pub use config::HierarchyConfig;
pub use error::{HierarchyError, HierarchyResult, QueryError, QueryStatus};

// Export collaborator traits and the in-memory implementations
pub use store::{
    ClassHierarchyCache, ClassHierarchyInspector, DataChangeEvent, HierarchyDefinition,
    MemoryStore, QueryExecutor, RequestCache, RequestState, RowStream, StaticDefinition,
};

#[cfg(test)]
mod tests {
    use crate::model::*;
    use serde_json::json;

    #[test]
    fn test_processing_params_deserialization() {
        // 1. Plain node
        let params: ProcessingParams = serde_json::from_value(json!({ "kind": "none" })).unwrap();
        assert_eq!(params, ProcessingParams::None);

        // 2. Hidden node
        let params: ProcessingParams =
            serde_json::from_value(json!({ "kind": "hideInHierarchy" })).unwrap();
        assert!(params.is_hidden());

        // 3. Grouped node, flags and option objects mixed
        let params: ProcessingParams = serde_json::from_value(json!({
            "kind": "grouping",
            "byClass": { "hideIfOneGroupedNode": true },
            "byLabel": true
        }))
        .unwrap();
        let spec = params.grouping().unwrap();
        assert!(spec.by_class.unwrap().hide_if_one_grouped_node);
        assert!(spec.by_label.is_some());
        assert!(spec.by_properties.is_none());
    }

    #[test]
    fn test_processed_node_is_tagged_by_type() {
        let mut node = InstancesNode::new("Pump 1", vec![InstanceKey::new("Plant.Pump", "0x1")]);
        node.flags.has_children = Some(true);
        node.handle = Some(NodeHandle(3));

        let value = serde_json::to_value(ProcessedNode::Instances(node)).unwrap();
        assert_eq!(value["type"], json!("instances"));
        assert_eq!(value["instanceKeys"][0]["className"], json!("Plant.Pump"));
        assert_eq!(value["flags"]["hasChildren"], json!(true));
        assert!(value.get("handle").is_none());

        // Nodes handed back by a client come without handles
        let parsed: ProcessedNode = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.handle(), None);
        assert_eq!(parsed.label(), "Pump 1");
    }

    #[test]
    fn test_grouping_node_key_serialization() {
        let node = ProcessedNode::Grouping(GroupingNode {
            kind: GroupingKind::PropertyValue {
                properties_class_name: "Plant.Element".to_string(),
                property_name: "color".to_string(),
                formatted_value: "red".to_string(),
            },
            label: "red".to_string(),
            children: Vec::new(),
            grouped_instance_keys: Vec::new(),
            auto_expand: false,
            parent_keys: vec![NodeKey::Generic("root".to_string())],
            handle: None,
            origin: None,
        });

        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], json!("grouping"));
        assert_eq!(value["kind"]["propertyValue"]["formattedValue"], json!("red"));
        assert_eq!(value["parentKeys"][0]["generic"], json!("root"));
        assert_eq!(node.has_children(), Some(false));
    }
}
