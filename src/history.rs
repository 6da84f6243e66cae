//! Append-only text log of played songs and their intros.

use anyhow::{Context, Result};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const SEPARATOR_WIDTH: usize = 40;

#[derive(Debug, Clone)]
pub struct HistoryLogger {
    path: PathBuf,
}

impl HistoryLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one SONG/INTRO entry followed by a dashed separator.
    pub fn log(&self, song_path: &Path, intro: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create history directory {}", parent.display())
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open history log {}", self.path.display()))?;

        let name = song_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| song_path.display().to_string());
        writeln!(file, "SONG: {name}")?;
        writeln!(file, "INTRO: {}", intro.trim())?;
        writeln!(file, "{}", "-".repeat(SEPARATOR_WIDTH))?;
        debug!("Logged {name} to {}", self.path.display());
        Ok(())
    }
}
