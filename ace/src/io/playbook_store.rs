//! Playbook load/save helpers with schema + invariant validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::core::playbook::Playbook;

const PLAYBOOK_SCHEMA: &str = include_str!("../../schemas/playbook.schema.json");

static SCHEMA_VALUE: LazyLock<Result<Value, String>> =
    LazyLock::new(|| serde_json::from_str(PLAYBOOK_SCHEMA).map_err(|err| err.to_string()));

/// Load and validate a playbook from disk (schema + invariants).
pub fn load_playbook(path: &Path) -> Result<Playbook> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read playbook {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse playbook {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate playbook {}", path.display()))?;
    let playbook: Playbook = serde_json::from_value(value)
        .with_context(|| format!("deserialize playbook {}", path.display()))?;
    validate_playbook_invariants(&playbook)
        .with_context(|| format!("validate playbook {}", path.display()))?;
    debug!(path = %path.display(), tips = playbook.len(), "loaded playbook");
    Ok(playbook)
}

/// Atomically write a playbook as pretty JSON.
pub fn save_playbook(path: &Path, playbook: &Playbook) -> Result<()> {
    let mut buf = playbook.dumps()?;
    buf.push('\n');
    super::write_atomic(path, &buf)
        .with_context(|| format!("write playbook {}", path.display()))?;
    debug!(path = %path.display(), tips = playbook.len(), "saved playbook");
    Ok(())
}

fn compiled_schema() -> Result<Validator> {
    let schema = SCHEMA_VALUE
        .as_ref()
        .map_err(|err| anyhow!("embedded playbook schema is not JSON: {err}"))?;
    validator_for(schema).map_err(|err| anyhow!("invalid playbook schema: {}", err))
}

fn validate_schema(value: &Value) -> Result<()> {
    let compiled = compiled_schema()?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "playbook schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn validate_playbook_invariants(playbook: &Playbook) -> Result<()> {
    let errors = playbook.validate_invariants();
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("playbook invariants failed: {}", errors.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_playbook() -> Playbook {
        let mut playbook = Playbook::new();
        playbook.add_tip("API Usage", "Check api_docs before calling", None, &[]);
        let id = playbook.add_tip("Pagination", "Loop until a page is empty", None, &[]);
        playbook.tag_tip(&id, &["spotify".to_string()]);
        playbook.record_feedback(&id, "helpful");
        playbook
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("playbook.json");
        let playbook = sample_playbook();

        save_playbook(&path, &playbook).expect("save");
        let loaded = load_playbook(&path).expect("load");

        assert_eq!(loaded, playbook);
        assert_eq!(loaded.next_id(), 2);
    }

    #[test]
    fn rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("playbook.json");
        fs::write(&path, r#"{"tips": {}, "sections": {}, "next_id": "one"}"#).expect("write");

        let err = load_playbook(&path).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn rejects_dangling_section_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("playbook.json");
        fs::write(
            &path,
            r#"{"tips": {}, "sections": {"api": ["api-00001"]}, "next_id": 1}"#,
        )
        .expect("write");

        let err = load_playbook(&path).unwrap_err();
        assert!(format!("{err:#}").contains("unknown tip 'api-00001'"));
    }
}
