//! Deterministic task selection over the registry.

use crate::core::registry::TaskRegistry;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Registry is empty; the Initializer has not populated it yet.
    Uninitialized,
    /// First task in creation order that neither passes nor is blocked.
    Open(SelectedTask),
    /// Every task passes.
    Complete,
    /// No task is selectable and at least one never passed.
    Blocked { ids: Vec<String> },
}

/// Minimal selected task metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedTask {
    pub id: String,
    pub description: String,
    pub attempts: u32,
    pub max_attempts: u32,
}

pub fn select_task(registry: &TaskRegistry, max_attempts: u32) -> Selection {
    if registry.is_empty() {
        return Selection::Uninitialized;
    }
    if let Some(task) = registry.next_incomplete(max_attempts) {
        return Selection::Open(SelectedTask {
            id: task.id.clone(),
            description: task.description.clone(),
            attempts: task.attempts,
            max_attempts,
        });
    }
    let blocked: Vec<String> = registry
        .blocked(max_attempts)
        .into_iter()
        .map(|task| task.id.clone())
        .collect();
    if blocked.is_empty() {
        Selection::Complete
    } else {
        Selection::Blocked { ids: blocked }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry_with;

    #[test]
    fn empty_registry_is_uninitialized() {
        assert_eq!(
            select_task(&TaskRegistry::default(), 50),
            Selection::Uninitialized
        );
    }

    #[test]
    fn selects_first_open_task() {
        let registry = registry_with(&[("a", true, 1), ("b", false, 2), ("c", false, 0)]);
        assert_eq!(
            select_task(&registry, 50),
            Selection::Open(SelectedTask {
                id: "T2".to_string(),
                description: "b".to_string(),
                attempts: 2,
                max_attempts: 50,
            })
        );
    }

    #[test]
    fn blocked_task_is_skipped_in_favor_of_later_open_task() {
        let registry = registry_with(&[("a", false, 50), ("b", false, 0)]);
        match select_task(&registry, 50) {
            Selection::Open(task) => assert_eq!(task.id, "T2"),
            other => panic!("expected open task, got {other:?}"),
        }
    }

    #[test]
    fn complete_when_everything_passes() {
        let registry = registry_with(&[("a", true, 1), ("b", true, 3)]);
        assert_eq!(select_task(&registry, 50), Selection::Complete);
    }

    #[test]
    fn blocked_when_only_exhausted_tasks_remain() {
        let registry = registry_with(&[("a", true, 1), ("b", false, 3), ("c", false, 4)]);
        assert_eq!(
            select_task(&registry, 3),
            Selection::Blocked {
                ids: vec!["T2".to_string(), "T3".to_string()]
            }
        );
    }
}
