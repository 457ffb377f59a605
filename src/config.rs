//! Agent configuration, loaded from an optional TOML file

use crate::command::DispatchConfig;
use crate::connection::LinkConfig;
use crate::radio::RadioConfig;
use crate::transport::FallbackConfig;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "fieldlink-agent.toml";

/// Top-level agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identifier sent as `sessionId` on outgoing radio requests
    pub device_id: String,
    pub link: LinkConfig,
    pub dispatch: DispatchConfig,
    pub fallback: FallbackConfig,
    pub radio: RadioConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "fieldlink-agent".into(),
            link: LinkConfig::default(),
            dispatch: DispatchConfig::default(),
            fallback: FallbackConfig::default(),
            radio: RadioConfig::default(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("io", "FieldLink", "Agent")
        .context("could not determine platform config directory")?;
    Ok(proj.config_dir().join(CONFIG_FILE_NAME))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Load the config; a missing file yields the defaults
pub fn load(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AgentConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn save(path: &Path, cfg: &AgentConfig, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    ensure_parent_dir(path)?;
    let raw = toml::to_string_pretty(cfg).context("failed to serialize config to TOML")?;
    fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))?;
    Ok(())
}
