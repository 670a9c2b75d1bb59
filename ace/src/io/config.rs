//! Adapter configuration stored as TOML (conventionally `ace.toml`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Adapter configuration (TOML).
///
/// Meant to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdapterConfig {
    /// Name passed to the environment when a task is initialized.
    pub experiment_name: String,

    /// Generate/execute rounds per task before giving up.
    pub max_interaction_steps: u32,

    /// Reflector rounds per task; stops early on an actionable reflection.
    pub max_refinement_rounds: u32,

    /// Learning passes over the training samples (offline only).
    pub epochs: u32,

    /// Recent reflections shown to the curator.
    pub reflection_window: usize,

    pub roles: RoleConfig,

    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoleConfig {
    /// Attempts per role call before giving up on unparsable output.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Deduplicate every N samples; `0` means once per epoch / run.
    pub frequency: u32,

    /// Cosine similarity above which a new tip counts as a duplicate.
    pub similarity_threshold: f32,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            frequency: 0,
            similarity_threshold: 0.8,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            experiment_name: "ace".to_string(),
            max_interaction_steps: 10,
            max_refinement_rounds: 1,
            epochs: 1,
            reflection_window: 3,
            roles: RoleConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl AdapterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.experiment_name.trim().is_empty() {
            return Err(anyhow!("experiment_name must be non-empty"));
        }
        if self.max_interaction_steps == 0 {
            return Err(anyhow!("max_interaction_steps must be > 0"));
        }
        if self.max_refinement_rounds == 0 {
            return Err(anyhow!("max_refinement_rounds must be > 0"));
        }
        if self.epochs == 0 {
            return Err(anyhow!("epochs must be > 0"));
        }
        if self.reflection_window == 0 {
            return Err(anyhow!("reflection_window must be > 0"));
        }
        if self.roles.max_retries == 0 {
            return Err(anyhow!("roles.max_retries must be > 0"));
        }
        let threshold = self.dedup.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(anyhow!(
                "dedup.similarity_threshold must be in (0, 1], got {threshold}"
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AdapterConfig::default()`.
pub fn load_config(path: &Path) -> Result<AdapterConfig> {
    if !path.exists() {
        let cfg = AdapterConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AdapterConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AdapterConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
