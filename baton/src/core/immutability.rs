//! Task immutability checks between two registry snapshots.

use std::collections::HashMap;

use crate::task::Task;

/// Validate that `next` is a legal successor of `prev`.
///
/// For each task in `prev`, this check enforces:
/// - The task still exists in `next` at the same position.
/// - `category`, `description` and `steps` are identical.
/// - `attempts` is unchanged (the counter is orchestrator-owned).
///
/// Tasks present only in `next` are reported as well: the set of tasks only
/// grows through `create`, never through a rewritten registry.
///
/// Returns stable error messages ordered by task position.
pub fn check_registry_immutability(prev: &[Task], next: &[Task]) -> Vec<String> {
    let next_index: HashMap<&str, (usize, &Task)> = next
        .iter()
        .enumerate()
        .map(|(position, task)| (task.id.as_str(), (position, task)))
        .collect();

    let mut errors = Vec::new();
    for (position, before) in prev.iter().enumerate() {
        let Some((next_position, after)) = next_index.get(before.id.as_str()) else {
            errors.push(format!("task '{}' missing in proposed registry", before.id));
            continue;
        };
        if *next_position != position {
            errors.push(format!(
                "task '{}' moved from position {} to {}",
                before.id, position, next_position
            ));
        }
        for field in changed_fields(before, after) {
            errors.push(format!("task '{}' field '{}' is immutable", before.id, field));
        }
        if after.attempts != before.attempts {
            errors.push(format!(
                "task '{}' attempts is orchestrator-owned ({} -> {})",
                before.id, before.attempts, after.attempts
            ));
        }
    }

    let known: HashMap<&str, ()> = prev.iter().map(|task| (task.id.as_str(), ())).collect();
    for task in next {
        if !known.contains_key(task.id.as_str()) {
            errors.push(format!(
                "task '{}' is new; tasks are only created by the initializer",
                task.id
            ));
        }
    }

    errors
}

fn changed_fields(before: &Task, after: &Task) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if before.category != after.category {
        fields.push("category");
    }
    if before.description != after.description {
        fields.push("description");
    }
    if before.steps != after.steps {
        fields.push("steps");
    }
    fields
}
