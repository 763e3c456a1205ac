use crate::error::HierarchyResult;
use crate::model::ClassInfo;
use crate::store::traits::ClassHierarchyInspector;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// In-process cache in front of the class hierarchy inspector.
///
/// Class metadata doesn't change for a schema version, so entries live as long as
/// the cache and are never evicted. Concurrent misses for the same lookup may both
/// hit the inspector; the answers are identical and the last write wins.
pub struct ClassHierarchyCache {
    inspector: Arc<dyn ClassHierarchyInspector>,
    /// `(class, base class)` -> derives
    derived: RwLock<HashMap<(String, String), bool>>,
    classes: RwLock<HashMap<String, ClassInfo>>,
}

impl ClassHierarchyCache {
    pub fn new(inspector: Arc<dyn ClassHierarchyInspector>) -> Self {
        Self {
            inspector,
            derived: RwLock::new(HashMap::new()),
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `class_name` is `base_class_name` or derives from it
    pub async fn is_derived_from(&self, class_name: &str, base_class_name: &str) -> HierarchyResult<bool> {
        if class_name == base_class_name {
            return Ok(true);
        }

        let key = (class_name.to_string(), base_class_name.to_string());
        let cached = self.derived.read().get(&key).copied();
        if let Some(result) = cached {
            return Ok(result);
        }

        let result = self
            .inspector
            .is_derived_from(class_name, base_class_name)
            .await?;
        self.derived.write().insert(key, result);
        Ok(result)
    }

    /// Resolve class metadata by its schema-qualified name
    pub async fn resolve(&self, class_name: &str) -> HierarchyResult<ClassInfo> {
        let cached = self.classes.read().get(class_name).cloned();
        if let Some(class) = cached {
            return Ok(class);
        }

        let class = self.inspector.get_class(class_name).await?;
        self.classes
            .write()
            .insert(class_name.to_string(), class.clone());
        Ok(class)
    }

    /// Number of cached lookups, derivation checks and classes together
    pub fn len(&self) -> usize {
        self.derived.read().len() + self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ClassHierarchyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassHierarchyCache")
            .field("derived", &self.derived.read().len())
            .field("classes", &self.classes.read().len())
            .finish()
    }
}
