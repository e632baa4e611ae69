//! Engine configuration stored in `cognitive.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans; missing fields default to sensible
/// values, and a missing file means "all defaults".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Module search paths, in priority order. Empty means the standard
    /// locations (see `resolver::default_search_paths`).
    pub search_paths: Vec<PathBuf>,

    /// Default model passed to the provider gateway.
    pub model: Option<String>,

    /// Sampling temperature passed to the provider gateway.
    pub temperature: f64,

    /// Total wall-clock budget for one top-level invocation in seconds.
    pub invocation_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            model: None,
            temperature: 0.2,
            invocation_timeout_secs: 5 * 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.invocation_timeout_secs == 0 {
            return Err(anyhow!("invocation_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within [0, 2]"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("cognitive.toml");
        let cfg = EngineConfig {
            model: Some("gpt-4o".to_string()),
            ..EngineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = EngineConfig {
            invocation_timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
