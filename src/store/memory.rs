use crate::error::{QueryError, QueryStatus};
use crate::model::{columns, ClassInfo, InstanceFilter, QueryDefinition, Row};
use crate::store::traits::{ClassHierarchyInspector, DataChangeEvent, QueryExecutor, RowStream};
use log::debug;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
struct MemoryClass {
    label: String,
    bases: Vec<String>,
}

/// In-memory query executor and class hierarchy inspector.
///
/// Rows are registered per query text. A query binding named `x` keeps rows whose
/// column `x` equals the bound value (or is one of them, when an array is bound).
/// An instance filter keeps rows whose label contains the filter expression.
#[derive(Debug)]
pub struct MemoryStore {
    classes: RwLock<HashMap<String, MemoryClass>>,
    queries: RwLock<HashMap<String, Vec<Row>>>,
    failures: RwLock<HashMap<String, QueryError>>,
    row_delay: RwLock<Option<Duration>>,
    rows_pulled: Arc<AtomicUsize>,
    executions: RwLock<HashMap<String, usize>>,
    inspector_calls: AtomicUsize,
    changes: broadcast::Sender<DataChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            classes: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            row_delay: RwLock::new(None),
            rows_pulled: Arc::new(AtomicUsize::new(0)),
            executions: RwLock::new(HashMap::new()),
            inspector_calls: AtomicUsize::new(0),
            changes,
        }
    }

    /// Register a class with its direct base classes
    pub fn add_class(&self, name: &str, label: &str, bases: &[&str]) {
        self.classes.write().insert(
            name.to_string(),
            MemoryClass {
                label: label.to_string(),
                bases: bases.iter().map(|b| b.to_string()).collect(),
            },
        );
    }

    /// Append rows to a query's result set and notify subscribers
    pub fn add_rows(&self, query: &str, rows: Vec<Row>) {
        self.queries
            .write()
            .entry(query.to_string())
            .or_default()
            .extend(rows);
        // Nobody listening is fine
        let _ = self.changes.send(DataChangeEvent::new(query));
    }

    /// Make every execution of `query` fail with `error`
    pub fn fail_query(&self, query: &str, error: QueryError) {
        self.failures.write().insert(query.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Wait this long before handing out each row
    pub fn set_row_delay(&self, delay: Option<Duration>) {
        *self.row_delay.write() = delay;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataChangeEvent> {
        self.changes.subscribe()
    }

    /// Total rows handed out by all executions so far
    pub fn rows_pulled(&self) -> usize {
        self.rows_pulled.load(Ordering::SeqCst)
    }

    pub fn executions(&self, query: &str) -> usize {
        self.executions.read().get(query).copied().unwrap_or(0)
    }

    pub fn total_executions(&self) -> usize {
        self.executions.read().values().sum()
    }

    pub fn inspector_calls(&self) -> usize {
        self.inspector_calls.load(Ordering::SeqCst)
    }

    fn matches(row: &Row, query: &QueryDefinition, instance_filter: Option<&InstanceFilter>) -> bool {
        let bound = query.bindings.iter().all(|binding| {
            let column = row.get(&binding.name);
            match (&binding.value, column) {
                (Value::Array(values), Some(value)) => values.contains(value),
                (value, Some(column)) => value == column,
                (_, None) => false,
            }
        });

        let filtered = match instance_filter {
            Some(filter) => row
                .get_str(columns::LABEL)
                .map(|label| label.contains(&filter.expression))
                .unwrap_or(false),
            None => true,
        };

        bound && filtered
    }
}

#[async_trait::async_trait]
impl QueryExecutor for MemoryStore {
    async fn execute(
        &self,
        query: &QueryDefinition,
        instance_filter: Option<&InstanceFilter>,
    ) -> Result<RowStream, QueryError> {
        *self
            .executions
            .write()
            .entry(query.query.clone())
            .or_insert(0) += 1;

        if let Some(error) = self.failures.read().get(&query.query).cloned() {
            return Err(error);
        }

        let rows: Vec<Row> = self
            .queries
            .read()
            .get(&query.query)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::matches(row, query, instance_filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!("Executing '{}': {} matching rows", query.query, rows.len());

        let delay = *self.row_delay.read();
        let pulled = self.rows_pulled.clone();
        let stream = async_stream::stream! {
            for row in rows {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                yield Ok(row);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[async_trait::async_trait]
impl ClassHierarchyInspector for MemoryStore {
    async fn is_derived_from(&self, class_name: &str, base_class_name: &str) -> Result<bool, QueryError> {
        self.inspector_calls.fetch_add(1, Ordering::SeqCst);
        let classes = self.classes.read();
        if !classes.contains_key(class_name) {
            return Err(QueryError::new(
                QueryStatus::Other(404),
                format!("Unknown class: {}", class_name),
            ));
        }

        // Breadth-first walk over base classes
        let mut queue = VecDeque::from([class_name.to_string()]);
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == base_class_name {
                return Ok(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(class) = classes.get(&current) {
                queue.extend(class.bases.iter().cloned());
            }
        }
        Ok(false)
    }

    async fn get_class(&self, class_name: &str) -> Result<ClassInfo, QueryError> {
        self.inspector_calls.fetch_add(1, Ordering::SeqCst);
        self.classes
            .read()
            .get(class_name)
            .map(|class| ClassInfo::new(class_name, class.label.clone()))
            .ok_or_else(|| {
                QueryError::new(QueryStatus::Other(404), format!("Unknown class: {}", class_name))
            })
    }
}

/// Row with the required instance node columns
pub fn instance_row(class_name: &str, id: &str, label: &str) -> Row {
    Row::new()
        .with(columns::CLASS_NAME, Value::String(class_name.to_string()))
        .with(columns::ID, Value::String(id.to_string()))
        .with(columns::LABEL, Value::String(label.to_string()))
}
