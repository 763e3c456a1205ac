use crate::config::HierarchyConfig;
use crate::error::{HierarchyError, HierarchyResult};
use crate::logic::grouping::GroupingEngine;
use crate::logic::node_source::{NodeSource, SourceContext};
use crate::logic::pagination::{Paginator, RowLimiter};
use crate::logic::pipeline::LevelPipeline;
use crate::model::{
    generate_id, FilterPath, GetNodesRequest, GroupingNode, HierarchyFilter, HierarchyVariables,
    InfoNode, InstanceFilter, InstanceKey, LevelOrigin, NodeHandle, NodeKey, PageWindow,
    ProcessedNode, RequestKey, RequestKind,
};
use crate::store::class_cache::ClassHierarchyCache;
use crate::store::request_cache::{CachedRequest, LevelResult, RequestCache, RequestState};
use crate::store::traits::{ClassHierarchyInspector, DataChangeEvent, HierarchyDefinition, QueryExecutor};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Lazily produced nodes of one `get_nodes` call
pub type NodesStream = BoxStream<'static, ProcessedNode>;

/// Builds hierarchy levels on request and keeps them until invalidated.
///
/// Cheap to clone; clones share caches and settings.
#[derive(Clone)]
pub struct HierarchyProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    pipeline: LevelPipeline,
    config: HierarchyConfig,
    classes: Arc<ClassHierarchyCache>,
    requests: RequestCache,
    handles: NodeArena,
    hierarchy_filter: RwLock<Option<Vec<FilterPath>>>,
    variables: RwLock<HierarchyVariables>,
}

/// Interns node identities into handles. Handles carry the arena generation in their
/// upper bits, so handles from before a reset never match new ones.
#[derive(Default)]
struct NodeArena {
    state: Mutex<ArenaState>,
}

#[derive(Default)]
struct ArenaState {
    generation: u64,
    handles: HashMap<String, NodeHandle>,
}

const GENERATION_SHIFT: u32 = 32;

impl ArenaState {
    fn is_current(&self, handle: NodeHandle) -> bool {
        handle.0 >> GENERATION_SHIFT == self.generation
    }

    fn intern_identity(&mut self, node: &ProcessedNode) -> NodeHandle {
        let next = NodeHandle((self.generation << GENERATION_SHIFT) | self.handles.len() as u64);
        *self.handles.entry(node.identity()).or_insert(next)
    }

    fn assign(&mut self, nodes: &mut [ProcessedNode]) {
        for node in nodes {
            let handle = self.intern_identity(node);
            node.set_handle(handle);
            if let ProcessedNode::Grouping(group) = node {
                self.assign(&mut group.children);
            }
        }
    }
}

impl NodeArena {
    fn intern(&self, node: &ProcessedNode) -> NodeHandle {
        let mut state = self.state.lock();
        match node.handle() {
            Some(handle) if state.is_current(handle) => handle,
            _ => state.intern_identity(node),
        }
    }

    /// Give every node, grouping children included, its handle
    fn assign(&self, nodes: &mut [ProcessedNode]) {
        self.state.lock().assign(nodes);
    }

    /// Forget every identity and start a new generation
    fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.handles.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().handles.len()
    }
}

impl HierarchyProvider {
    pub fn new(
        definition: Arc<dyn HierarchyDefinition>,
        executor: Arc<dyn QueryExecutor>,
        inspector: Arc<dyn ClassHierarchyInspector>,
        config: HierarchyConfig,
    ) -> Self {
        let config = config.normalized();
        let classes = Arc::new(ClassHierarchyCache::new(inspector));
        let pipeline = LevelPipeline::new(
            NodeSource::new(definition, executor),
            GroupingEngine::new(classes.clone()),
            config.concurrency.clone(),
        );

        Self {
            inner: Arc::new(ProviderInner {
                pipeline,
                config,
                classes,
                requests: RequestCache::new(),
                handles: NodeArena::default(),
                hierarchy_filter: RwLock::new(None),
                variables: RwLock::new(HierarchyVariables::new()),
            }),
        }
    }

    /// Nodes of the level under `request.parent`, sliced to `request.page`.
    ///
    /// Levels that exceed the row ceiling or time out come back as a single
    /// placeholder node; a canceled request comes back empty. Definition and
    /// unclassified failures are returned as errors.
    pub async fn get_nodes(&self, request: GetNodesRequest) -> HierarchyResult<NodesStream> {
        let parent_keys = child_parent_keys(request.parent.as_ref());
        let result = self.inner.clone().load_page(request).await;
        let nodes = match result {
            Ok(nodes) => nodes.as_ref().clone(),
            Err(err) => placeholder(err, parent_keys)?,
        };
        Ok(stream::iter(nodes).boxed())
    }

    /// Number of nodes `get_nodes` returns for the whole level
    pub async fn get_nodes_count(
        &self,
        parent: Option<&ProcessedNode>,
        instance_filter: Option<InstanceFilter>,
    ) -> HierarchyResult<usize> {
        let key = self
            .inner
            .request_key(RequestKind::Level, parent, None, instance_filter, None);
        let level = self.inner.clone().start_level(&key, parent.cloned());
        let result = level.execution.clone().await;
        if result.is_err() {
            self.inner.requests.remove(&level);
        }

        match result {
            Ok(nodes) => Ok(nodes.len()),
            Err(err) => placeholder(err, child_parent_keys(parent)).map(|nodes| nodes.len()),
        }
    }

    /// Whether `node` has children, resolving it with a first-child request if unknown
    pub async fn has_children(&self, node: &ProcessedNode) -> HierarchyResult<bool> {
        match node.has_children() {
            Some(known) => Ok(known),
            None => self.inner.has_children_of(node).await,
        }
    }

    /// Restrict the hierarchy to the given paths; `None` removes the filter.
    /// Cached levels are dropped, class metadata is kept.
    pub fn set_hierarchy_filter(&self, filter: Option<HierarchyFilter>) {
        let paths = filter.map(|f| f.paths);
        info!(
            "Hierarchy filter {}",
            match &paths {
                Some(paths) => format!("set to {} paths", paths.len()),
                None => "removed".to_string(),
            }
        );
        *self.inner.hierarchy_filter.write() = paths;
        self.inner.reset();
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let changed = {
            let mut variables = self.inner.variables.write();
            variables.insert(name.clone(), value.clone()) != Some(value)
        };
        if changed {
            debug!("Hierarchy variable '{}' changed", name);
            self.inner.reset();
        }
    }

    pub fn set_variables(&self, variables: HierarchyVariables) {
        let changed = {
            let mut current = self.inner.variables.write();
            let changed = *current != variables;
            *current = variables;
            changed
        };
        if changed {
            debug!("Hierarchy variables replaced");
            self.inner.reset();
        }
    }

    pub fn variables(&self) -> HierarchyVariables {
        self.inner.variables.read().clone()
    }

    /// Data behind the hierarchy changed; every cached level is stale
    pub fn notify_data_changed(&self, event: &DataChangeEvent) {
        info!("Data changed ({}), invalidating cached hierarchy levels", event.source);
        self.invalidate();
    }

    /// Drop cached levels and node handles. Class metadata is kept.
    pub fn invalidate(&self) {
        self.inner.reset();
    }

    /// Invalidate on every event from `events` until the sender goes away or the
    /// provider is dropped
    pub fn listen(&self, mut events: broadcast::Receiver<DataChangeEvent>) -> JoinHandle<()> {
        let inner: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(provider) = inner.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => {
                        info!("Data changed ({}), invalidating cached hierarchy levels", event.source);
                        provider.reset();
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} data change events, invalidating cached hierarchy levels", missed);
                        provider.reset();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Data change listener stopped");
        })
    }

    /// State of the cached execution serving `request`
    pub fn request_state(&self, request: &GetNodesRequest) -> RequestState {
        let key = self.inner.request_key(
            RequestKind::Nodes,
            request.parent.as_ref(),
            request.page,
            request.instance_filter.clone(),
            request.size_limit,
        );
        self.inner.requests.state(&key.canonical())
    }

    pub fn class_cache(&self) -> &ClassHierarchyCache {
        &self.inner.classes
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.inner.config
    }
}

impl ProviderInner {
    fn reset(&self) {
        self.requests.clear();
        self.handles.reset();
    }

    fn request_key(
        &self,
        kind: RequestKind,
        parent: Option<&ProcessedNode>,
        page: Option<PageWindow>,
        instance_filter: Option<InstanceFilter>,
        size_limit: Option<usize>,
    ) -> RequestKey {
        RequestKey {
            kind,
            parent: parent.map(|p| self.handles.intern(p)),
            page,
            instance_filter,
            variables: self.variables.read().clone(),
            size_limit: self.config.effective_size_limit(size_limit),
        }
    }

    /// Cached execution building the whole level of `key`
    fn start_level(self: Arc<Self>, key: &RequestKey, parent: Option<ProcessedNode>) -> CachedRequest {
        let level_key = key.level();
        let canonical = level_key.canonical();
        let inner = self.clone();
        self.requests.get_or_start(&canonical, move || match parent {
            Some(ProcessedNode::Grouping(group)) => inner.group_level(level_key, group),
            Some(ProcessedNode::Info(_)) => future::ready(Ok(Arc::new(Vec::new()))).boxed(),
            Some(parent) if level_key.instance_filter.is_none() && parent.precomputed_children().is_some() => {
                let mut children = parent.precomputed_children().map(<[_]>::to_vec).unwrap_or_default();
                inner.handles.assign(&mut children);
                future::ready(Ok(Arc::new(children))).boxed()
            }
            parent => inner.build_level(level_key, parent),
        })
    }

    /// Children of a grouping node. Under an instance filter the level the group
    /// was built in runs again with the filter and the same group is picked from it.
    fn group_level(self: Arc<Self>, key: RequestKey, group: GroupingNode) -> BoxFuture<'static, LevelResult> {
        async move {
            let Some(filter) = key.instance_filter.clone() else {
                let mut children = group.children;
                self.handles.assign(&mut children);
                return Ok(Arc::new(children));
            };
            let origin = group.origin.clone().ok_or_else(|| {
                HierarchyError::Unknown(format!(
                    "grouping node '{}' was not built by this provider and cannot be filtered",
                    group.label
                ))
            })?;

            let level_parent = origin.parent().cloned();
            let origin_key = RequestKey {
                kind: RequestKind::Level,
                parent: level_parent.as_ref().map(|p| self.handles.intern(p)),
                page: None,
                instance_filter: Some(filter),
                variables: key.variables.clone(),
                size_limit: key.size_limit,
            };
            let depth = level_parent.as_ref().map(|p| p.child_parent_keys().len()).unwrap_or(0);

            let level = self.clone().start_level(&origin_key, level_parent);
            let result = level.execution.clone().await;
            if result.is_err() {
                self.requests.remove(&level);
            }
            let nodes = result?;

            let mut child_keys = group.parent_keys.clone();
            child_keys.push(NodeKey::Grouping(group.kind.clone()));
            let path = child_keys.get(depth..).unwrap_or_default();
            let mut children = group_children(&nodes, path, &group.grouped_instance_keys, &child_keys);
            self.handles.assign(&mut children);
            Ok(Arc::new(children))
        }
        .boxed()
    }

    fn build_level(self: Arc<Self>, key: RequestKey, parent: Option<ProcessedNode>) -> BoxFuture<'static, LevelResult> {
        async move {
            let execution_id = generate_id();
            let start_time = Instant::now();
            debug!("Level execution {} started", execution_id);

            // Step 1: filter paths of the level
            let filter_paths = match &parent {
                Some(parent) => parent.filter_paths().map(|p| p.to_vec()),
                None => self.hierarchy_filter.read().clone(),
            };

            // Step 2: one row ceiling for every query of the level
            let context = Arc::new(SourceContext::new(
                key.variables.clone(),
                key.instance_filter.clone(),
                RowLimiter::new(key.size_limit),
            ));

            // Step 3: run the pipeline and intern the resulting nodes
            let origin = Arc::new(LevelOrigin::new(parent.as_ref()));
            let result = self.pipeline.level(parent, filter_paths, context).await;
            let mut nodes = match result {
                Ok(nodes) => nodes,
                Err(err) => {
                    debug!("Level execution {} failed: {}", execution_id, err);
                    return Err(err);
                }
            };
            self.handles.assign(&mut nodes);
            set_origin(&mut nodes, &origin);

            debug!(
                "Level execution {} produced {} nodes in {:?}",
                execution_id,
                nodes.len(),
                start_time.elapsed()
            );
            Ok(Arc::new(nodes))
        }
        .boxed()
    }

    /// Page of a level with children flags resolved, shared between identical requests
    async fn load_page(self: Arc<Self>, request: GetNodesRequest) -> LevelResult {
        let key = self.request_key(
            RequestKind::Nodes,
            request.parent.as_ref(),
            request.page,
            request.instance_filter.clone(),
            request.size_limit,
        );

        let level = self.clone().start_level(&key, request.parent.clone());
        let inner = self.clone();
        let level_execution = level.execution.clone();
        let page = request.page;
        let nodes = self.requests.get_or_start(&key.canonical(), move || {
            async move {
                let level = level_execution.await?;
                let slice = Paginator::slice(level.iter(), page);
                let nodes = inner.determine_children(slice.nodes).await?;
                Ok::<_, HierarchyError>(Arc::new(nodes))
            }
            .boxed()
        });

        let result = match request.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(HierarchyError::Canceled),
                result = nodes.execution.clone() => result,
            },
            None => nodes.execution.clone().await,
        };

        match &result {
            Err(HierarchyError::Canceled) => {
                debug!("Request {} canceled", nodes.key);
                for cached in [&nodes, &level] {
                    self.requests.abandon(cached);
                }
            }
            Err(_) => {
                self.requests.remove(&nodes);
                if matches!(level.execution.peek(), Some(Err(_))) {
                    self.requests.remove(&level);
                }
            }
            Ok(_) => {}
        }
        result
    }

    /// Resolve unknown `has_children` flags, a bounded number at a time
    async fn determine_children(self: Arc<Self>, nodes: Vec<ProcessedNode>) -> HierarchyResult<Vec<ProcessedNode>> {
        if !self.config.determine_children {
            return Ok(nodes);
        }

        let concurrency = self.config.concurrency.children_checks;
        stream::iter(nodes)
            .map(move |mut node| {
                let inner = self.clone();
                async move {
                    if node.has_children().is_none() {
                        let has_children = inner.has_children_of(&node).await?;
                        node.set_has_children(has_children);
                    }
                    Ok::<_, HierarchyError>(node)
                }
            })
            .buffered(concurrency)
            .try_collect()
            .await
    }

    async fn has_children_of(&self, node: &ProcessedNode) -> HierarchyResult<bool> {
        if let Some(children) = node.precomputed_children() {
            return Ok(!children.is_empty());
        }

        let context = Arc::new(SourceContext::new(
            self.variables.read().clone(),
            None,
            RowLimiter::unlimited(),
        ));
        match self.pipeline.has_visible_child(node.clone(), context).await {
            Ok(has_children) => Ok(has_children),
            // Let the user expand the node and see the placeholder
            Err(HierarchyError::ResultSetTooLarge { .. }) => Ok(true),
            Err(HierarchyError::BackendTimeout(message)) => {
                warn!("Children check of '{}' timed out: {}", node.label(), message);
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

fn child_parent_keys(parent: Option<&ProcessedNode>) -> Vec<NodeKey> {
    parent.map(|p| p.child_parent_keys()).unwrap_or_default()
}

fn set_origin(nodes: &mut [ProcessedNode], origin: &Arc<LevelOrigin>) {
    for node in nodes {
        if let ProcessedNode::Grouping(group) = node {
            group.origin = Some(origin.clone());
            set_origin(&mut group.children, origin);
        }
    }
}

/// Children of the group at `path` among `nodes`. A group the filter left too small
/// to be shown is replaced by the leaves it would have held.
fn group_children(
    nodes: &[ProcessedNode],
    path: &[NodeKey],
    grouped: &[InstanceKey],
    parent_keys: &[NodeKey],
) -> Vec<ProcessedNode> {
    let Some((step, rest)) = path.split_first() else {
        return nodes.to_vec();
    };
    if let Some(group) = nodes.iter().find(|n| n.key() == *step) {
        let children = group.precomputed_children().unwrap_or_default();
        return group_children(children, rest, grouped, parent_keys);
    }

    nodes
        .iter()
        .filter(|n| !n.is_grouping() && !n.instance_keys().is_empty())
        .filter(|n| n.instance_keys().iter().all(|k| grouped.contains(k)))
        .map(|n| {
            let mut node = n.clone();
            node.set_parent_keys(parent_keys.to_vec());
            node
        })
        .collect()
}

/// Turn a recoverable failure into what the caller gets to see instead of the level
fn placeholder(err: HierarchyError, parent_keys: Vec<NodeKey>) -> HierarchyResult<Vec<ProcessedNode>> {
    match err {
        HierarchyError::ResultSetTooLarge { limit } => {
            info!("Level exceeds the row limit ({:?}), returning a placeholder", limit);
            Ok(vec![ProcessedNode::Info(InfoNode::result_set_too_large(limit, parent_keys))])
        }
        HierarchyError::BackendTimeout(message) => {
            warn!("Level timed out: {}", message);
            Ok(vec![ProcessedNode::Info(InfoNode::backend_timeout(&message, parent_keys))])
        }
        HierarchyError::Canceled => Ok(Vec::new()),
        err => Err(err),
    }
}

impl std::fmt::Debug for HierarchyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyProvider")
            .field("config", &self.inner.config)
            .field("requests", &self.inner.requests)
            .field("classes", &self.inner.classes)
            .finish()
    }
}
