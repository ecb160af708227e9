//! In-memory task registry with creation-once and immutability rules.

use crate::core::immutability::check_registry_immutability;
use crate::error::BatonError;
use crate::task::{NewTask, Task};

/// Completion summary for reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    pub passed: usize,
    pub total: usize,
}

impl Completion {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.passed as f64 / self.total as f64) * 100.0
    }
}

/// Ordered task collection. Insertion order is priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Read-only snapshot in creation order.
    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Populate an empty registry. Ids are assigned sequentially.
    pub fn create(&mut self, specs: Vec<NewTask>) -> Result<&[Task], BatonError> {
        if !self.tasks.is_empty() {
            return Err(BatonError::AlreadyInitialized {
                existing: self.tasks.len(),
            });
        }
        if specs.is_empty() {
            return Err(BatonError::InitializationRequired {
                reason: "create requires at least one task".to_string(),
            });
        }
        self.tasks = specs
            .into_iter()
            .enumerate()
            .map(|(position, spec)| Task::from_new(position, spec))
            .collect();
        Ok(self.tasks.as_slice())
    }

    /// Set `passes=true`. A second call reports `AlreadyPassed` and changes nothing.
    pub fn mark_passed(&mut self, id: &str) -> Result<(), BatonError> {
        let task = self.find_mut(id)?;
        if task.passes {
            return Err(BatonError::AlreadyPassed { id: id.to_string() });
        }
        task.passes = true;
        Ok(())
    }

    /// Increment the attempt counter, returning the new value.
    pub fn record_attempt(&mut self, id: &str) -> Result<u32, BatonError> {
        let task = self.find_mut(id)?;
        task.attempts += 1;
        Ok(task.attempts)
    }

    /// First task in creation order that neither passes nor is blocked.
    pub fn next_incomplete(&self, max_attempts: u32) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|task| !task.passes && !task.is_blocked(max_attempts))
    }

    /// Tasks that spent their retry budget, in creation order.
    pub fn blocked(&self, max_attempts: u32) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.is_blocked(max_attempts))
            .collect()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            passed: self.tasks.iter().filter(|task| task.passes).count(),
            total: self.tasks.len(),
        }
    }

    /// Check a whole proposed task list against this registry.
    ///
    /// Returns violations of the immutability rules; `passes` flips are not
    /// violations here and are left to the caller's scope policy.
    pub fn check_proposed(&self, proposed: &[Task]) -> Vec<String> {
        check_registry_immutability(&self.tasks, proposed)
    }

    /// Registry for a working tree restored to an older checkpoint.
    ///
    /// Tasks are never lost and attempts never go backwards: every task in
    /// `current` survives with the larger attempt count, and `passes` comes
    /// from `restored` (false for tasks it does not know).
    pub fn carry_forward(restored: &TaskRegistry, current: &TaskRegistry) -> TaskRegistry {
        let tasks = current
            .tasks
            .iter()
            .map(|task| {
                let old = restored.get(&task.id);
                Task {
                    passes: old.is_some_and(|old| old.passes),
                    attempts: old.map_or(task.attempts, |old| old.attempts.max(task.attempts)),
                    ..task.clone()
                }
            })
            .collect();
        TaskRegistry::new(tasks)
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Task, BatonError> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| BatonError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_task, registry_with};

    #[test]
    fn create_assigns_sequential_ids_and_defaults() {
        let mut registry = TaskRegistry::default();
        let created = registry
            .create(vec![new_task("first"), new_task("second")])
            .expect("create");
        let ids: Vec<&str> = created.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
        assert!(created.iter().all(|task| !task.passes && task.attempts == 0));
    }

    #[test]
    fn create_twice_is_rejected() {
        let mut registry = registry_with(&[("a", false, 0)]);
        let err = registry.create(vec![new_task("again")]).unwrap_err();
        assert_eq!(err, BatonError::AlreadyInitialized { existing: 1 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn create_rejects_empty_list() {
        let mut registry = TaskRegistry::default();
        let err = registry.create(Vec::new()).unwrap_err();
        assert!(matches!(err, BatonError::InitializationRequired { .. }));
    }

    #[test]
    fn mark_passed_reports_already_passed_without_change() {
        let mut registry = registry_with(&[("a", false, 0)]);
        registry.mark_passed("T1").expect("first mark");
        let err = registry.mark_passed("T1").unwrap_err();
        assert_eq!(
            err,
            BatonError::AlreadyPassed {
                id: "T1".to_string()
            }
        );
        assert!(registry.get("T1").expect("task").passes);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut registry = registry_with(&[("a", false, 0)]);
        assert!(matches!(
            registry.mark_passed("T7"),
            Err(BatonError::NotFound { .. })
        ));
        assert!(matches!(
            registry.record_attempt("T7"),
            Err(BatonError::NotFound { .. })
        ));
    }

    #[test]
    fn record_attempt_increments() {
        let mut registry = registry_with(&[("a", false, 2)]);
        assert_eq!(registry.record_attempt("T1").expect("attempt"), 3);
        assert_eq!(registry.get("T1").expect("task").attempts, 3);
    }

    #[test]
    fn proposed_edits_to_immutable_fields_are_reported() {
        let registry = registry_with(&[("a", false, 0), ("b", false, 0)]);
        let mut proposed = registry.list().to_vec();
        proposed[0].description = "rewritten".to_string();
        proposed[1].steps.clear();
        assert_eq!(registry.check_proposed(&proposed).len(), 2);

        let mut claimed = registry.list().to_vec();
        claimed[0].passes = true;
        assert!(registry.check_proposed(&claimed).is_empty());
    }

    #[test]
    fn next_incomplete_skips_passed_and_blocked() {
        let registry = registry_with(&[("a", true, 1), ("b", false, 3), ("c", false, 0)]);
        assert_eq!(registry.next_incomplete(3).expect("open").id, "T3");
        assert_eq!(registry.next_incomplete(50).expect("open").id, "T2");
        let blocked: Vec<&str> = registry
            .blocked(3)
            .iter()
            .map(|task| task.id.as_str())
            .collect();
        assert_eq!(blocked, vec!["T2"]);
    }

    #[test]
    fn next_incomplete_is_deterministic() {
        let registry = registry_with(&[("a", false, 0), ("b", false, 0)]);
        let first = registry.next_incomplete(50).map(|task| task.id.clone());
        for _ in 0..10 {
            assert_eq!(registry.next_incomplete(50).map(|task| task.id.clone()), first);
        }
    }

    #[test]
    fn next_incomplete_none_when_all_pass() {
        let registry = registry_with(&[("a", true, 1), ("b", true, 4)]);
        assert!(registry.next_incomplete(50).is_none());
    }

    #[test]
    fn completion_counts_passed() {
        let registry =
            registry_with(&[("a", true, 1), ("b", false, 0), ("c", false, 0), ("d", true, 2)]);
        let completion = registry.completion();
        assert_eq!(completion.passed, 2);
        assert_eq!(completion.total, 4);
        assert!((completion.percent() - 50.0).abs() < f64::EPSILON);
        assert!((TaskRegistry::default().completion().percent()).abs() < f64::EPSILON);
    }

    #[test]
    fn carry_forward_keeps_tasks_and_attempts() {
        let restored = registry_with(&[("a", true, 1), ("b", false, 2)]);
        let current = registry_with(&[("a", true, 1), ("b", true, 4), ("c", false, 3)]);

        let merged = TaskRegistry::carry_forward(&restored, &current);

        let rows: Vec<(&str, bool, u32)> = merged
            .list()
            .iter()
            .map(|task| (task.id.as_str(), task.passes, task.attempts))
            .collect();
        assert_eq!(rows, vec![("T1", true, 1), ("T2", false, 4), ("T3", false, 3)]);
    }
}
