use crate::model::{Id, InstanceKey};
use serde::{Deserialize, Serialize};

/// One step of a hierarchy filter path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterTarget {
    Instance(InstanceKey),
    Generic(Id),
}

/// Steps from the root level down to the filter target. Hidden levels take part in
/// the path like any other level.
pub type FilterPath = Vec<FilterTarget>;

/// Path-based filter restricting the hierarchy to nodes on at least one of the paths
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HierarchyFilter {
    pub paths: Vec<FilterPath>,
}

impl HierarchyFilter {
    pub fn new(paths: Vec<FilterPath>) -> Self {
        Self { paths }
    }
}

/// Opaque instance filter handed to the query executor together with the query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub expression: String,
}

impl InstanceFilter {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}
