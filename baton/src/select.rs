//! Selection helper for `baton select`.

use anyhow::{Context, Result};

use crate::core::selector::{Selection, select_task};
use crate::io::config::load_config;
use crate::io::init::BatonPaths;
use crate::io::registry_store::load_registry;

/// Load the registry and select the next task.
///
/// `max_attempts` overrides `max_attempts_per_task` from the config.
pub fn select_from_root(paths: &BatonPaths, max_attempts: Option<u32>) -> Result<Selection> {
    let config = load_config(&paths.config_path)?;
    let registry =
        load_registry(&paths.registry_path).with_context(|| "load registry for selection")?;
    Ok(select_task(
        &registry,
        max_attempts.unwrap_or(config.max_attempts_per_task),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestRepo, registry_with};

    #[test]
    fn select_returns_first_open_task() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo
            .init_project(Some(&registry_with(&[("a", true, 1), ("b", false, 0)])))
            .expect("project");

        match select_from_root(&paths, None).expect("select") {
            Selection::Open(task) => {
                assert_eq!(task.id, "T2");
                assert_eq!(task.max_attempts, 50);
            }
            other => panic!("expected open task, got {other:?}"),
        }
    }

    #[test]
    fn override_can_block_a_task() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo
            .init_project(Some(&registry_with(&[("a", false, 2)])))
            .expect("project");

        assert_eq!(
            select_from_root(&paths, Some(2)).expect("select"),
            Selection::Blocked {
                ids: vec!["T1".to_string()]
            }
        );
    }

    #[test]
    fn missing_registry_is_uninitialized() {
        let repo = TestRepo::new().expect("repo");
        let paths = repo.init_project(None).expect("project");
        assert_eq!(
            select_from_root(&paths, None).expect("select"),
            Selection::Uninitialized
        );
    }
}
