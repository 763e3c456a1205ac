use futures::StreamExt;
use hierarchy_builder::model::columns;
use hierarchy_builder::store::{instance_row, parent_instance_ids};
use hierarchy_builder::{
    DataChangeEvent, FilterTarget, GetNodesRequest, GroupingKind, HierarchyConfig, HierarchyError,
    HierarchyFilter, HierarchyProvider, InstanceFilter, InstanceKey, LevelDefinition, MemoryStore,
    ProcessedNode, QueryDefinition, QueryError, QueryStatus, RequestState, StaticDefinition,
    BACKEND_TIMEOUT_KEY, RESULT_SET_TOO_LARGE_KEY,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Folder f1 with items x1, x2; hidden h1 with items x3, x4
fn store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_class("Base", "Base Element", &[]);
    store.add_class("Sub1", "Sub Element 1", &["Base"]);
    store.add_class("Sub2", "Sub Element 2", &["Base"]);
    store.add_class("Folder", "Folder", &[]);
    store.add_class("Hidden", "Hidden", &[]);
    store.add_class("X", "X", &[]);

    store.add_rows(
        "roots",
        vec![
            instance_row("Folder", "f1", "Folder 1"),
            instance_row("Hidden", "h1", "Hidden 1").with(columns::HIDE_IN_HIERARCHY, json!(true)),
        ],
    );
    store.add_rows(
        "items",
        vec![
            instance_row("X", "1", "x1").with("parentId", json!("f1")),
            instance_row("X", "2", "x2").with("parentId", json!("f1")),
            instance_row("X", "3", "x3").with("parentId", json!("h1")),
            instance_row("X", "4", "x4").with("parentId", json!("h1")),
        ],
    );
    store
}

fn items_of(parent: &ProcessedNode) -> Vec<LevelDefinition> {
    vec![LevelDefinition::instances(
        "X",
        QueryDefinition::new("items").bind("parentId", parent_instance_ids(parent)),
    )]
}

fn definition(root_query: &str) -> StaticDefinition {
    StaticDefinition::new(vec![LevelDefinition::instances("Folder", QueryDefinition::new(root_query))])
        .with_class_children("Folder", |parent, _| Ok(items_of(parent)))
        .with_class_children("Hidden", |parent, _| Ok(items_of(parent)))
}

fn provider(store: &Arc<MemoryStore>, definition: StaticDefinition, config: HierarchyConfig) -> HierarchyProvider {
    HierarchyProvider::new(Arc::new(definition), store.clone(), store.clone(), config)
}

async fn get(provider: &HierarchyProvider, request: GetNodesRequest) -> Vec<ProcessedNode> {
    provider.get_nodes(request).await.unwrap().collect().await
}

fn labels(nodes: &[ProcessedNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.label()).collect()
}

fn many_rows(store: &MemoryStore, query: &str, count: usize) {
    store.add_rows(
        query,
        (0..count)
            .map(|i| instance_row("X", &i.to_string(), &format!("item {:02}", i)))
            .collect(),
    );
}

#[tokio::test]
async fn test_hidden_node_children_are_shown_at_parent_level() {
    init_logging();
    let store = store();
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let roots = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(labels(&roots), vec!["Folder 1", "x3", "x4"]);
    assert!(roots.iter().all(|n| n.parent_keys().is_empty()));

    // Children flags are resolved before nodes are returned
    assert_eq!(roots[0].has_children(), Some(true));
    assert_eq!(roots[1].has_children(), Some(false));

    let children = get(&provider, GetNodesRequest::children_of(roots[0].clone())).await;
    assert_eq!(labels(&children), vec!["x1", "x2"]);
    assert_eq!(children[0].parent_keys(), &[roots[0].key()]);

    assert_eq!(provider.get_nodes_count(None, None).await.unwrap(), 3);
}

#[tokio::test]
async fn test_base_class_grouping_scenario() {
    init_logging();
    let store = store();
    let grouping = json!({ "byBaseClasses": { "fullClassNames": ["Base"] } });
    store.add_rows(
        "elements",
        vec![
            instance_row("Sub1", "1", "first").with(columns::GROUPING, grouping.clone()),
            instance_row("Sub2", "2", "second").with(columns::GROUPING, grouping),
        ],
    );
    let provider = provider(&store, definition("elements"), HierarchyConfig::default());

    let roots = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(roots.len(), 1);
    assert_eq!(
        roots[0].key(),
        hierarchy_builder::NodeKey::Grouping(GroupingKind::BaseClass {
            class_name: "Base".to_string()
        })
    );
    assert_eq!(roots[0].label(), "Base Element");
    assert_eq!(roots[0].instance_keys().len(), 2);

    // Grouped nodes come from the grouping node itself, no query runs
    let executions = store.total_executions();
    let children = get(&provider, GetNodesRequest::children_of(roots[0].clone())).await;
    assert_eq!(labels(&children), vec!["first", "second"]);
    assert_eq!(store.total_executions(), executions);
    assert_eq!(provider.get_nodes_count(Some(&roots[0]), None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_pages_are_exact_slices_of_the_level() {
    init_logging();
    let store = store();
    many_rows(&store, "many", 10);
    let provider = provider(&store, definition("many"), HierarchyConfig::default());

    let all = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(all.len(), 10);
    assert_eq!(provider.get_nodes_count(None, None).await.unwrap(), 10);

    for (start, size) in [(0, 3), (3, 3), (9, 5), (10, 1), (4, 0)] {
        let page = get(&provider, GetNodesRequest::root().with_page(start, size)).await;
        let expected: Vec<&str> = labels(&all).into_iter().skip(start).take(size).collect();
        assert_eq!(labels(&page), expected, "page {}+{}", start, size);
    }

    // Every page was cut from one execution of the level
    assert_eq!(store.executions("many"), 1);
}

#[tokio::test]
async fn test_size_limit_stops_reading_rows() {
    init_logging();
    let store = store();
    many_rows(&store, "many", 50);
    let mut config = HierarchyConfig::default();
    config.limits.size_limit = Some(5);
    let provider = provider(&store, definition("many"), config);

    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(nodes.len(), 1);
    let ProcessedNode::Info(info) = &nodes[0] else {
        panic!("expected a placeholder, got {:?}", nodes[0]);
    };
    assert_eq!(info.message_key, RESULT_SET_TOO_LARGE_KEY);
    assert_eq!(store.rows_pulled(), 6);
    assert_eq!(provider.get_nodes_count(None, None).await.unwrap(), 1);

    // A larger ceiling on the request itself lifts the limit
    let nodes = get(&provider, GetNodesRequest::root().with_size_limit(100)).await;
    assert_eq!(nodes.len(), 50);
}

#[tokio::test]
async fn test_size_limit_counts_hidden_children() {
    init_logging();
    let store = store();
    let mut config = HierarchyConfig::default();
    config.limits.size_limit = Some(3);
    let provider = provider(&store, definition("roots"), config);

    // 2 root rows and 2 rows under the hidden node
    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].key(), hierarchy_builder::NodeKey::Info(RESULT_SET_TOO_LARGE_KEY.to_string()));
}

#[tokio::test]
async fn test_identical_requests_share_one_execution() {
    init_logging();
    let store = store();
    store.set_row_delay(Some(Duration::from_millis(5)));
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let (a, b) = tokio::join!(
        get(&provider, GetNodesRequest::root()),
        get(&provider, GetNodesRequest::root())
    );
    assert_eq!(labels(&a), labels(&b));
    assert_eq!(store.executions("roots"), 1);
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Completed);

    assert_eq!(provider.get_nodes_count(None, None).await.unwrap(), 3);
    assert_eq!(store.executions("roots"), 1);

    // A different instance filter is a different request
    let filtered = get(
        &provider,
        GetNodesRequest::root().with_instance_filter(InstanceFilter::new("Folder")),
    )
    .await;
    assert_eq!(labels(&filtered), vec!["Folder 1"]);
    assert_eq!(store.executions("roots"), 2);
}

#[tokio::test]
async fn test_timeouts_become_placeholders() {
    init_logging();
    let store = store();
    store.fail_query("roots", QueryError::timeout("query took more than 30s"));
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(nodes.len(), 1);
    let ProcessedNode::Info(info) = &nodes[0] else {
        panic!("expected a placeholder, got {:?}", nodes[0]);
    };
    assert_eq!(info.message_key, BACKEND_TIMEOUT_KEY);
    assert!(info.message.contains("30s"));

    // Failures aren't cached
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Idle);
    store.clear_failures();
    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(nodes.len(), 3);
}

#[tokio::test]
async fn test_unknown_and_definition_errors_propagate() {
    init_logging();
    let store = store();
    store.fail_query("roots", QueryError::new(QueryStatus::Other(500), "connection reset"));
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let err = provider.get_nodes(GetNodesRequest::root()).await.err().unwrap();
    assert!(matches!(err, HierarchyError::Unknown(ref m) if m.contains("connection reset")));

    let broken = StaticDefinition::new(Vec::new())
        .with_generic_children("root", |_, _| Err(anyhow::anyhow!("no rule for 'root'")));
    let provider = HierarchyProvider::new(Arc::new(broken), store.clone(), store.clone(), HierarchyConfig::default());
    let parent = hierarchy_builder::GenericNodeDefinition::new("root", "Root").into_node();

    let err = provider
        .get_nodes(GetNodesRequest::children_of(parent.clone()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HierarchyError::Definition(_)));
    assert!(err.to_string().contains("no rule for 'root'"));
    assert!(provider.get_nodes_count(Some(&parent), None).await.is_err());
}

#[tokio::test]
async fn test_canceled_request_returns_nothing() {
    init_logging();
    let store = store();
    store.set_row_delay(Some(Duration::from_millis(20)));
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let token = CancellationToken::new();
    token.cancel();
    let nodes = get(&provider, GetNodesRequest::root().with_cancellation(token)).await;
    assert!(nodes.is_empty());
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Idle);

    // Cancel while rows are still coming in
    let token = CancellationToken::new();
    let canceler = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceler.cancel();
    });
    let nodes = get(&provider, GetNodesRequest::root().with_cancellation(token)).await;
    assert!(nodes.is_empty());
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Idle);

    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(labels(&nodes), vec!["Folder 1", "x3", "x4"]);
}

#[tokio::test]
async fn test_data_changes_invalidate_cached_levels() {
    init_logging();
    let store = store();
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());
    let listener = provider.listen(store.subscribe());

    assert_eq!(get(&provider, GetNodesRequest::root()).await.len(), 3);
    assert_eq!(store.executions("roots"), 1);

    store.add_rows("roots", vec![instance_row("Folder", "f2", "Folder 2")]);
    for _ in 0..100 {
        if provider.request_state(&GetNodesRequest::root()) == RequestState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let nodes = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(labels(&nodes), vec!["Folder 1", "Folder 2", "x3", "x4"]);
    assert_eq!(store.executions("roots"), 2);

    provider.notify_data_changed(&DataChangeEvent::new("manual"));
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Idle);
    listener.abort();
}

#[tokio::test]
async fn test_hierarchy_filter_follows_paths_through_hidden_levels() {
    init_logging();
    let store = store();
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());
    assert_eq!(get(&provider, GetNodesRequest::root()).await.len(), 3);

    provider.set_hierarchy_filter(Some(HierarchyFilter::new(vec![
        vec![
            FilterTarget::Instance(InstanceKey::new("Hidden", "h1")),
            FilterTarget::Instance(InstanceKey::new("X", "4")),
        ],
        vec![
            FilterTarget::Instance(InstanceKey::new("Folder", "f1")),
            FilterTarget::Instance(InstanceKey::new("X", "1")),
        ],
    ])));

    let roots = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(labels(&roots), vec!["Folder 1", "x4"]);
    assert!(roots[0].auto_expand());

    let children = get(&provider, GetNodesRequest::children_of(roots[0].clone())).await;
    assert_eq!(labels(&children), vec!["x1"]);

    provider.set_hierarchy_filter(None);
    assert_eq!(get(&provider, GetNodesRequest::root()).await.len(), 3);
}

#[tokio::test]
async fn test_variables_reach_the_definition_and_reset_the_cache() {
    init_logging();
    let store = store();
    many_rows(&store, "many", 4);
    let definition = StaticDefinition::new(Vec::new())
        .with_generic_children("root", |_, variables| {
            let query = variables
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or("roots")
                .to_string();
            Ok(vec![LevelDefinition::instances("X", QueryDefinition::new(query))])
        });
    let provider = provider(&store, definition, HierarchyConfig::default());
    let parent = hierarchy_builder::GenericNodeDefinition::new("root", "Root").into_node();

    let before = get(&provider, GetNodesRequest::children_of(parent.clone())).await;
    assert_eq!(labels(&before), vec!["Folder 1"]);

    provider.set_variable("source", json!("many"));
    let after = get(&provider, GetNodesRequest::children_of(parent.clone())).await;
    assert_eq!(after.len(), 4);

    // Setting the same value again keeps cached levels
    provider.set_variable("source", json!("many"));
    assert_eq!(
        provider.request_state(&GetNodesRequest::children_of(parent)),
        RequestState::Completed
    );
}

#[tokio::test]
async fn test_zero_concurrency_settings_still_make_progress() {
    init_logging();
    let store = store();
    let mut config = HierarchyConfig::default();
    config.concurrency.children_checks = 0;
    config.concurrency.hidden_levels = 0;
    let provider = provider(&store, definition("roots"), config);
    assert_eq!(provider.config().concurrency.children_checks, 1);

    let nodes = tokio::time::timeout(Duration::from_secs(5), get(&provider, GetNodesRequest::root()))
        .await
        .expect("level loads with zero configured concurrency");
    assert_eq!(labels(&nodes), vec!["Folder 1", "x3", "x4"]);
    assert_eq!(nodes[0].has_children(), Some(true));
}

#[tokio::test]
async fn test_instance_filter_applies_to_grouping_node_children() {
    init_logging();
    let store = store();
    let grouping = json!({ "byClass": true });
    store.add_rows(
        "fruits",
        vec![
            instance_row("X", "1", "apple").with(columns::GROUPING, grouping.clone()),
            instance_row("X", "2", "banana").with(columns::GROUPING, grouping),
        ],
    );
    let provider = provider(&store, definition("fruits"), HierarchyConfig::default());

    let roots = get(&provider, GetNodesRequest::root()).await;
    assert_eq!(roots.len(), 1);
    assert!(roots[0].is_grouping());

    let all = get(&provider, GetNodesRequest::children_of(roots[0].clone())).await;
    assert_eq!(labels(&all), vec!["apple", "banana"]);

    let request = GetNodesRequest::children_of(roots[0].clone()).with_instance_filter(InstanceFilter::new("apple"));
    let filtered = get(&provider, request.clone()).await;
    assert_eq!(labels(&filtered), vec!["apple"]);
    assert_eq!(filtered[0].parent_keys(), roots[0].child_parent_keys().as_slice());
    assert_eq!(provider.request_state(&request), RequestState::Completed);
    assert_eq!(
        provider
            .get_nodes_count(Some(&roots[0]), Some(InstanceFilter::new("apple")))
            .await
            .unwrap(),
        1
    );

    // Cancellation reaches grouping parents too
    let token = CancellationToken::new();
    token.cancel();
    let canceled = get(
        &provider,
        GetNodesRequest::children_of(roots[0].clone())
            .with_instance_filter(InstanceFilter::new("banana"))
            .with_cancellation(token),
    )
    .await;
    assert!(canceled.is_empty());

    // A grouping node rebuilt from its serialized form has no level to filter
    let restored: ProcessedNode = serde_json::from_value(serde_json::to_value(&roots[0]).unwrap()).unwrap();
    let err = provider
        .get_nodes(GetNodesRequest::children_of(restored).with_instance_filter(InstanceFilter::new("ban")))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HierarchyError::Unknown(_)));
}

#[tokio::test]
async fn test_nodes_from_before_invalidation_keep_working() {
    init_logging();
    let store = store();
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let before = get(&provider, GetNodesRequest::root()).await;
    provider.invalidate();
    let after = get(&provider, GetNodesRequest::root()).await;

    assert_eq!(labels(&before), labels(&after));
    assert_ne!(before[0].handle(), after[0].handle());

    let children = get(&provider, GetNodesRequest::children_of(before[0].clone())).await;
    assert_eq!(labels(&children), vec!["x1", "x2"]);
}

#[tokio::test]
async fn test_canceling_one_caller_keeps_the_shared_execution() {
    init_logging();
    let store = store();
    store.set_row_delay(Some(Duration::from_millis(20)));
    let provider = provider(&store, definition("roots"), HierarchyConfig::default());

    let token = CancellationToken::new();
    let (canceled, other, _) = tokio::join!(
        get(&provider, GetNodesRequest::root().with_cancellation(token.clone())),
        get(&provider, GetNodesRequest::root()),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        }
    );

    assert!(canceled.is_empty());
    assert_eq!(labels(&other), vec!["Folder 1", "x3", "x4"]);
    assert_eq!(store.executions("roots"), 1);

    // The surviving caller's result stays cached
    assert_eq!(provider.request_state(&GetNodesRequest::root()), RequestState::Completed);
    get(&provider, GetNodesRequest::root()).await;
    assert_eq!(store.executions("roots"), 1);
}
