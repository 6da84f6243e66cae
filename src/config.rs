//! # Configuration Module
//!
//! Platform data/config locations and the optional JSON config file.
//!
//! ## Data Storage
//!
//! The history log lives in the platform-standard data directory:
//! - Linux: `~/.local/share/discjockey/`
//! - macOS: `~/Library/Application Support/discjockey/`
//! - Windows: `%APPDATA%\discjockey\`
//!
//! ## Config File
//!
//! `config.json` in the platform config directory (for example
//! `~/.config/discjockey/config.json`). Every field is optional:
//!
//! ```json
//! {
//!   "model": "phi4:14b-q4_K_M",
//!   "tts_engine": "espeak",
//!   "tts_speed": 1.2,
//!   "sample_size": 10,
//!   "prompts_dir": "/home/me/dj-prompts"
//! }
//! ```
//!
//! Precedence is CLI flag, then config file, then built-in default.

use crate::tts::EngineKind;
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "discjockey";
const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.log";

/// Returns the platform-appropriate data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The `discjockey` subdirectory cannot be created due to permissions
///
/// # Examples
///
/// ```no_run
/// use discjockey::config::get_data_dir;
///
/// let dir = get_data_dir()?;
/// println!("History lives in {}", dir.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. \
             Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Path of the optional JSON config file. The file need not exist.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine system config directory."))?;
    Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Settings read from `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Fixed Ollama model. Detected from GPU memory when absent.
    pub model: Option<String>,
    pub ollama_bin: String,
    pub tts_engine: EngineKind,
    pub tts_speed: f32,
    pub sample_size: usize,
    /// Defaults to `history.log` in the data directory.
    pub history_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub llm_attempts: usize,
    /// Directory whose `*.txt` files override the built-in prompts.
    pub prompts_dir: Option<PathBuf>,
    pub preview_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: None,
            ollama_bin: "ollama".to_string(),
            tts_engine: EngineKind::platform_default(),
            tts_speed: 1.2,
            sample_size: 10,
            history_path: None,
            http_timeout_secs: 5,
            llm_attempts: 3,
            prompts_dir: None,
            preview_seconds: 20,
        }
    }
}

impl RuntimeConfig {
    /// Read a config file, or defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or contains
    /// invalid JSON or unknown fields.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// [`RuntimeConfig::load`] on the platform config path.
    pub fn load_default() -> Result<Self> {
        Self::load(&get_config_path()?)
    }

    pub fn history_file(&self) -> Result<PathBuf> {
        match &self.history_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join(HISTORY_FILE)),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}
