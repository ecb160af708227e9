//! Task registry load/save helpers with schema + invariant validation.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_invariants;
use crate::core::registry::TaskRegistry;
use crate::error::BatonError;
use crate::task::{REGISTRY_VERSION, RegistryDoc};

pub const REGISTRY_SCHEMA: &str = include_str!("../../schemas/task_registry.schema.json");

/// Load and validate the registry from disk (schema + invariants).
///
/// A missing file is an empty, uninitialized registry.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_registry(path: &Path) -> Result<TaskRegistry> {
    if !path.exists() {
        debug!("registry missing, treating as empty");
        return Ok(TaskRegistry::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read registry {}", path.display()))?;
    let doc = parse_registry(&contents).with_context(|| format!("load {}", path.display()))?;
    Ok(TaskRegistry::new(doc.tasks))
}

/// Parse registry JSON and check it against the schema and invariants.
pub fn parse_registry(contents: &str) -> Result<RegistryDoc> {
    let value: Value = serde_json::from_str(contents).context("parse registry json")?;
    validate_schema(&value)?;
    let doc: RegistryDoc = serde_json::from_value(value).context("deserialize registry")?;
    let errors = validate_invariants(&doc);
    if !errors.is_empty() {
        return Err(anyhow!(
            "registry invariants failed:\n- {}",
            errors.join("\n- ")
        ));
    }
    Ok(doc)
}

/// Serialize a registry the way it is stored on disk.
pub fn render_registry(registry: &TaskRegistry) -> Result<String> {
    let doc = RegistryDoc {
        version: REGISTRY_VERSION,
        tasks: registry.list().to_vec(),
    };
    let mut buf = serde_json::to_string_pretty(&doc).context("serialize registry")?;
    buf.push('\n');
    Ok(buf)
}

/// Atomically replace the registry file (temp file + fsync + rename).
///
/// Failures surface as [`BatonError::PersistenceError`].
#[instrument(skip_all, fields(path = %path.display(), tasks = registry.len()))]
pub fn write_registry(path: &Path, registry: &TaskRegistry) -> Result<()> {
    let buf = render_registry(registry)?;
    write_atomic(path, buf.as_bytes()).map_err(|err| BatonError::persistence(path, err))?;
    debug!("registry written");
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(REGISTRY_SCHEMA).context("parse registry schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile registry schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "registry schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry_with;

    #[test]
    fn missing_file_is_empty_registry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let registry = load_registry(&temp.path().join("tasks.json")).expect("load");
        assert!(registry.is_empty());
    }

    #[test]
    fn write_then_load_preserves_order_and_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".baton/tasks.json");
        let registry = registry_with(&[("a", true, 2), ("b", false, 0)]);

        write_registry(&path, &registry).expect("write");
        let loaded = load_registry(&path).expect("load");

        assert_eq!(loaded, registry);
        assert!(!temp.path().join(".baton/tasks.json.tmp").exists());
    }

    #[test]
    fn schema_rejects_unknown_fields() {
        let raw = r#"{"version": 1, "tasks": [{"id": "T1", "category": "c", "description": "d",
            "steps": [], "passes": false, "attempts": 0, "blocked": true}]}"#;
        let err = parse_registry(raw).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn invariants_reject_out_of_order_ids() {
        let raw = r#"{"version": 1, "tasks": [
            {"id": "T2", "category": "c", "description": "d", "steps": [], "passes": false, "attempts": 0}
        ]}"#;
        let err = parse_registry(raw).unwrap_err();
        assert!(format!("{err:#}").contains("expected 'T1'"));
    }

    #[test]
    fn write_failure_is_persistence_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "file, not a dir").expect("write blocker");

        let err = write_registry(&blocker.join("tasks.json"), &registry_with(&[("a", false, 0)]))
            .unwrap_err();
        assert!(matches!(
            crate::error::as_baton(&err),
            Some(BatonError::PersistenceError { .. })
        ));
    }
}
