//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::task::{REGISTRY_VERSION, RegistryDoc, task_id};

/// Check semantic invariants not expressible in JSON Schema:
/// - Supported `version`
/// - No duplicate ids
/// - Ids match creation order (`T1`, `T2`, ...)
/// - Non-empty `description`
pub fn validate_invariants(doc: &RegistryDoc) -> Vec<String> {
    let mut errors = Vec::new();
    if doc.version != REGISTRY_VERSION {
        errors.push(format!(
            "unsupported registry version {} (expected {})",
            doc.version, REGISTRY_VERSION
        ));
    }

    let mut seen = HashSet::new();
    for (position, task) in doc.tasks.iter().enumerate() {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}'", task.id));
        }
        let expected = task_id(position);
        if task.id != expected {
            errors.push(format!(
                "task at position {} has id '{}' (expected '{}')",
                position, task.id, expected
            ));
        }
        if task.description.trim().is_empty() {
            errors.push(format!("{}: description must not be empty", task.id));
        }
    }
    errors
}
