use crate::error::HierarchyResult;
use crate::store::class_cache::ClassHierarchyCache;

/// Order the candidate base classes `class_name` derives from, most general first.
///
/// Candidates are taken in declaration order. Each one goes right after the
/// closest class already in the chain that it derives from. A candidate that
/// derives from none of them is a new root and goes in front of the classes
/// deriving from it. Candidates the class doesn't derive from are skipped.
pub async fn base_class_chain(
    classes: &ClassHierarchyCache,
    class_name: &str,
    candidates: &[String],
) -> HierarchyResult<Vec<String>> {
    let mut chain: Vec<String> = Vec::new();

    for candidate in candidates {
        if chain.contains(candidate) || !classes.is_derived_from(class_name, candidate).await? {
            continue;
        }

        let mut ancestor = None;
        for (index, existing) in chain.iter().enumerate().rev() {
            if classes.is_derived_from(candidate, existing).await? {
                ancestor = Some(index);
                break;
            }
        }

        let position = match ancestor {
            Some(index) => index + 1,
            None => {
                let mut position = chain.len();
                for (index, existing) in chain.iter().enumerate() {
                    if classes.is_derived_from(existing, candidate).await? {
                        position = index;
                        break;
                    }
                }
                position
            }
        };
        chain.insert(position, candidate.clone());
    }

    Ok(chain)
}
