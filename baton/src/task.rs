use serde::{Deserialize, Serialize};

/// Current on-disk registry format version.
pub const REGISTRY_VERSION: u32 = 1;

/// One feature unit tracked by the registry.
///
/// `id`, `category`, `description` and `steps` are fixed at creation; only
/// `passes` and `attempts` change afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub category: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
    pub attempts: u32,
}

/// Task specification as proposed by the Initializer, before ids are assigned.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Serialized registry document (`.baton/tasks.json`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryDoc {
    pub version: u32,
    pub tasks: Vec<Task>,
}

impl Default for RegistryDoc {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            tasks: Vec::new(),
        }
    }
}

/// Id for the task at zero-based `position` in creation order.
pub fn task_id(position: usize) -> String {
    format!("T{}", position + 1)
}

impl Task {
    pub fn from_new(position: usize, spec: NewTask) -> Self {
        Self {
            id: task_id(position),
            category: spec.category,
            description: spec.description,
            steps: spec.steps,
            passes: false,
            attempts: 0,
        }
    }

    /// True once the retry budget is spent without a verified pass.
    pub fn is_blocked(&self, max_attempts: u32) -> bool {
        !self.passes && self.attempts >= max_attempts
    }
}
