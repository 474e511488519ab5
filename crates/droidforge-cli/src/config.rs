//! TOML configuration. Every field is defaulted so running without a
//! config file works out of the box.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use droidforge_orchestrator::URL_DOWNLOAD_LIMIT_BYTES;
use droidforge_toolchain::ToolchainConfig;

const DEFAULT_CONFIG_FILE: &str = "droidforge.toml";
const DEFAULT_STATE_DIR: &str = "droidforge-state";
const DEFAULT_IDLE_EXPIRY_MS: u64 = 6 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the session state file and per-session workdirs.
    pub state_dir: PathBuf,
    pub download_limit_bytes: u64,
    pub session_idle_expiry_ms: u64,
    pub toolchain: ToolchainConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            download_limit_bytes: URL_DOWNLOAD_LIMIT_BYTES,
            session_idle_expiry_ms: DEFAULT_IDLE_EXPIRY_MS,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("sessions.jsonl")
    }

    pub fn work_root(&self) -> PathBuf {
        self.state_dir.join("work")
    }
}

/// Loads configuration. An explicitly given path must exist; the implicit
/// `droidforge.toml` in the working directory is optional.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !path.is_file() {
        if required {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("malformed config {}", path.display()))?;
    tracing::debug!(config = %path.display(), "configuration loaded");
    Ok(config)
}
