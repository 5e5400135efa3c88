// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: a TOML file with home-directory expansion on
//! every path, plus the state-directory resolution chain.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot determine home directory")]
    NoHome,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub claude: ClaudeSection,
    #[serde(default)]
    pub cidx: CidxSection,
    #[serde(default)]
    pub system_prompts: SystemPromptsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    /// Root of registered repositories
    #[serde(default = "default_repositories_path")]
    pub repositories_path: PathBuf,
    /// Root of per-job workspaces, staging directories, and records
    #[serde(default = "default_jobs_path")]
    pub jobs_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Wall-clock age (from creation) past which workspaces are reclaimed
    #[serde(default = "default_timeout_hours")]
    pub timeout_hours: u64,
    /// Age past which terminal records are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaudeSection {
    /// The assistant program plus default arguments
    #[serde(default = "default_claude_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CidxSection {
    /// The semantic-index CLI
    #[serde(default = "default_cidx_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemPromptsSection {
    /// Template instructing the assistant to use the sidecar
    #[serde(default)]
    pub cidx_available_template_path: PathBuf,
    /// Template instructing the assistant to use classic text search
    #[serde(default)]
    pub cidx_unavailable_template_path: PathBuf,
}

fn default_repositories_path() -> PathBuf {
    PathBuf::from("~/bx/repos")
}

fn default_jobs_path() -> PathBuf {
    PathBuf::from("~/bx/jobs")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_timeout_hours() -> u64 {
    24
}

fn default_retention_days() -> u64 {
    30
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_claude_command() -> Vec<String> {
    vec![
        "claude".to_string(),
        "--print".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ]
}

fn default_cidx_command() -> Vec<String> {
    vec!["cidx".to_string()]
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self { repositories_path: default_repositories_path(), jobs_path: default_jobs_path() }
    }
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_hours: default_timeout_hours(),
            retention_days: default_retention_days(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

impl Default for ClaudeSection {
    fn default() -> Self {
        Self { command: default_claude_command() }
    }
}

impl Default for CidxSection {
    fn default() -> Self {
        Self { command: default_cidx_command() }
    }
}

impl Config {
    /// Load from `BX_CONFIG` or `~/.config/bx/config.toml`. A missing file
    /// yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var("BX_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => {
                let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
                home.join(".config/bx/config.toml")
            }
        };
        if !path.exists() {
            let config = Config::default().expanded()?;
            config.validate()?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Config = toml::from_str(&text)?;
        let config = config.expanded()?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `~` in every configured path.
    fn expanded(mut self) -> Result<Self, ConfigError> {
        self.workspace.repositories_path = expand_tilde(&self.workspace.repositories_path)?;
        self.workspace.jobs_path = expand_tilde(&self.workspace.jobs_path)?;
        self.system_prompts.cidx_available_template_path =
            expand_tilde(&self.system_prompts.cidx_available_template_path)?;
        self.system_prompts.cidx_unavailable_template_path =
            expand_tilde(&self.system_prompts.cidx_unavailable_template_path)?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.max_concurrent == 0 {
            return Err(ConfigError::Invalid("jobs.max_concurrent must be at least 1".to_string()));
        }
        if self.claude.command.is_empty() {
            return Err(ConfigError::Invalid("claude.command must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_tilde(path: &Path) -> Result<PathBuf, ConfigError> {
    let Some(s) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if s == "~" {
        return dirs::home_dir().ok_or(ConfigError::NoHome);
    }
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        return Ok(home.join(rest));
    }
    Ok(path.to_path_buf())
}

/// Resolve the daemon state directory:
/// `BX_STATE_DIR` > `$XDG_STATE_HOME/bx` > `~/.local/state/bx`.
pub fn state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var("BX_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("bx"));
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(".local/state/bx"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
