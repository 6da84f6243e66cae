//! # Prompt Templates
//!
//! Prompt text lives in `prompts/*.txt` and is compiled into the binary.
//! A user override directory (see `RuntimeConfig::prompts_dir`) may shadow any
//! template by file name. Placeholders use `{{name}}` syntax.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const NEXT_SONG: &str = "next_song.txt";
pub const REFEREE: &str = "referee.txt";
pub const INTRO_METADATA: &str = "intro_metadata.txt";
pub const INTRO_SIMPLE: &str = "intro_simple.txt";
pub const INTRO_TEXT: &str = "intro_text.txt";

lazy_static! {
    /// Override files already read from disk, keyed by full path.
    static ref PROMPT_CACHE: Mutex<HashMap<PathBuf, String>> = Mutex::new(HashMap::new());
}

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        NEXT_SONG => Some(include_str!("../prompts/next_song.txt")),
        REFEREE => Some(include_str!("../prompts/referee.txt")),
        INTRO_METADATA => Some(include_str!("../prompts/intro_metadata.txt")),
        INTRO_SIMPLE => Some(include_str!("../prompts/intro_simple.txt")),
        INTRO_TEXT => Some(include_str!("../prompts/intro_text.txt")),
        _ => None,
    }
}

/// Template lookup with an optional override directory.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Load a template by file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, an override file exists but
    /// cannot be read, or no template by that name exists.
    pub fn load(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            anyhow::bail!("prompt name is required");
        }
        if let Some(dir) = &self.override_dir {
            let path = dir.join(name);
            if path.is_file() {
                return load_cached(&path);
            }
        }
        builtin(name)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Prompt template not found: {name}"))
    }

    /// Load and render in one go.
    pub fn render(&self, name: &str, values: &[(&str, &str)]) -> Result<String> {
        Ok(render_prompt(&self.load(name)?, values))
    }
}

fn load_cached(path: &Path) -> Result<String> {
    let mut cache = PROMPT_CACHE
        .lock()
        .map_err(|_| anyhow::anyhow!("prompt cache lock poisoned"))?;
    if let Some(text) = cache.get(path) {
        return Ok(text.clone());
    }
    debug!("Loading prompt override {}", path.display());
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    cache.insert(path.to_path_buf(), text.clone());
    Ok(text)
}

/// Replace `{{key}}` placeholders. Unknown placeholders are left alone.
pub fn render_prompt(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}
