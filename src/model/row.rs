use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column names every instance node query projects (required) or may project (optional)
pub mod columns {
    pub const CLASS_NAME: &str = "className";
    pub const ID: &str = "id";
    pub const LABEL: &str = "label";

    pub const HAS_CHILDREN: &str = "hasChildren";
    pub const AUTO_EXPAND: &str = "autoExpand";
    pub const SUPPORTS_FILTERING: &str = "supportsFiltering";
    pub const HIDE_IN_HIERARCHY: &str = "hideInHierarchy";
    /// JSON grouping spec, see `GroupingSpec`
    pub const GROUPING: &str = "grouping";
    pub const EXTENDED_DATA: &str = "extendedData";

    pub const REQUIRED: [&str; 3] = [CLASS_NAME, ID, LABEL];
}

/// Untyped result row as produced by the query executor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a row from a JSON object; anything else gives an empty row
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.0.insert(column.to_string(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    /// Row ids may come as strings or numbers
    pub fn get_id(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn missing_columns(&self) -> Vec<&'static str> {
        columns::REQUIRED
            .iter()
            .copied()
            .filter(|c| self.get(c).is_none())
            .collect()
    }
}
