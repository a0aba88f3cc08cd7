//! Engine configuration stored as TOML (default `lifelog-agent.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "lifelog-agent.toml";

/// Engine configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on ReAct cycles per query.
    pub max_iterations: u32,

    /// Items requested from the Retriever per Act step.
    pub retrieval_limit: usize,

    /// Per-collaborator-call timeout in seconds. `0` disables the timeout.
    pub call_timeout_secs: u64,

    /// Capacity of the event channel between a streaming run and its consumer.
    pub stream_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            retrieval_limit: 5,
            call_timeout_secs: 60,
            stream_buffer: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_iterations == 0 {
            return Err(EngineError::Configuration(
                "max_iterations must be >= 1".to_string(),
            ));
        }
        if self.retrieval_limit == 0 {
            return Err(EngineError::Configuration(
                "retrieval_limit must be >= 1".to_string(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(EngineError::Configuration(
                "stream_buffer must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
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
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
