use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

pub type Id = String;

/// Identifies one data-source row: a schema-qualified class name plus an opaque row id.
/// Two keys with different class names are never equal, even when their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    #[serde(rename = "className")]
    pub class_name: String,
    pub id: Id,
}

impl InstanceKey {
    pub fn new(class_name: impl Into<String>, id: impl Into<Id>) -> Self {
        Self {
            class_name: class_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.id)
    }
}

/// Class metadata as resolved by the class hierarchy inspector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Schema-qualified name, e.g. "BisCore.Element"
    pub name: String,
    /// Display label of the class
    pub label: String,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// Add keys to `target`, skipping the ones already present. Keeps first-seen order.
pub fn union_instance_keys(target: &mut Vec<InstanceKey>, keys: impl IntoIterator<Item = InstanceKey>) {
    let mut seen: HashSet<InstanceKey> = target.iter().cloned().collect();
    for key in keys {
        if seen.insert(key.clone()) {
            target.push(key);
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}
