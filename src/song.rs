//! # Song Metadata Module
//!
//! Reads tag metadata from local audio files with `lofty` and provides the
//! display helpers used by the candidate lists and the DJ prompts.
//!
//! Tag reading is forgiving: a file with broken or missing tags still yields a
//! [`Song`] with defaults (file stem as title, `Unknown Artist`, `Unknown Album`).
//! Use [`Song::read_tags`] when a hard failure is wanted instead.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use log::debug;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::tag::{Accessor, ItemKey, Tag};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Extensions `Song::read_tags` accepts.
const TAGGED_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "wav", "m4a"];

lazy_static! {
    static ref YEAR_RE: Regex = Regex::new(r"(19|20)\d{2}").expect("static year pattern");
}

/// A song file together with the tag data the DJ talks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub is_compilation: bool,
    pub length_seconds: Option<u64>,
    pub size_bytes: Option<u64>,
    pub year: Option<String>,
}

impl Song {
    /// Song with default metadata derived from the path alone.
    pub fn placeholder(path: &Path) -> Self {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown Title".to_string());

        Song {
            path: path.to_path_buf(),
            title,
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            is_compilation: false,
            length_seconds: None,
            size_bytes: None,
            year: None,
        }
    }

    /// Load a song, falling back to defaults for anything the tags do not provide.
    pub fn from_path(path: &Path) -> Self {
        match Self::read_tags(path) {
            Ok(song) => song,
            Err(e) => {
                debug!("Metadata load failed for {}: {e:#}", path.display());
                let mut song = Self::placeholder(path);
                song.size_bytes = std::fs::metadata(path).ok().map(|m| m.len());
                song
            }
        }
    }

    /// Strict tag read. Fails for unsupported extensions or unreadable files.
    pub fn read_tags(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !TAGGED_EXTENSIONS.contains(&ext.as_str()) {
            anyhow::bail!(
                "Unsupported file format '{}'. Supported: {}",
                path.display(),
                TAGGED_EXTENSIONS.join(", ")
            );
        }

        let mut song = Self::placeholder(path);
        song.size_bytes = Some(
            std::fs::metadata(path)
                .with_context(|| format!("Cannot stat '{}'", path.display()))?
                .len(),
        );

        let tagged_file = lofty::read_from_path(path)
            .with_context(|| format!("Failed to read tags from '{}'", path.display()))?;

        let secs = tagged_file.properties().duration().as_secs();
        song.length_seconds = (secs > 0).then_some(secs);

        if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            song.apply_tag(tag);
        }

        Ok(song)
    }

    fn apply_tag(&mut self, tag: &Tag) {
        if let Some(title) = tag.title().filter(|t| !t.trim().is_empty()) {
            self.title = title.trim().to_string();
        }
        if let Some(artist) = tag.artist().filter(|a| !a.trim().is_empty()) {
            self.artist = artist.trim().to_string();
        }
        if let Some(album) = tag.album().filter(|a| !a.trim().is_empty()) {
            self.album = album.trim().to_string();
        }
        self.is_compilation = tag
            .get_string(&ItemKey::FlagCompilation)
            .map(|v| v.trim() == "1")
            .unwrap_or(false);
        self.year = extract_year_from_candidates(&[
            tag.get_string(&ItemKey::OriginalReleaseDate),
            tag.get_string(&ItemKey::RecordingDate),
            tag.get_string(&ItemKey::Year),
        ]);
    }

    /// Base file name, as shown to the LLM and in the history log.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Length as `MM:SS`, or empty when unknown.
    pub fn formatted_length(&self) -> String {
        match self.length_seconds {
            Some(secs) if secs > 0 => format!("{:02}:{:02}", secs / 60, secs % 60),
            _ => String::new(),
        }
    }

    /// One-line summary for selection lists.
    pub fn one_line_info(&self) -> String {
        let mut parts = Vec::new();
        let length = self.formatted_length();
        if !length.is_empty() {
            parts.push(length);
        }
        parts.push(self.file_name());
        parts.push(format!("Artist: {}", self.artist));
        if let Some(year) = &self.year {
            parts.push(format!("({year})"));
        }
        parts.join(" | ")
    }

    /// Multi-line summary of the key fields.
    pub fn multiline_info(&self) -> String {
        let mut lines = vec![
            format!("Title:  {}", self.title),
            format!("Artist: {}", self.artist),
            format!("Album:  {}", self.album),
        ];
        if let Some(year) = &self.year {
            lines.push(format!("Year:   {year}"));
        }
        let length = self.formatted_length();
        if !length.is_empty() {
            lines.push(format!("Length: {length}"));
        }
        lines.push(format!(".. Compilation: {}", self.is_compilation));
        lines.join("\n")
    }

    /// True when both songs carry the same, known artist.
    pub fn same_artist(&self, other: &Song) -> bool {
        !self.artist.eq_ignore_ascii_case(UNKNOWN_ARTIST)
            && self.artist.to_lowercase() == other.artist.to_lowercase()
    }
}

/// First candidate that yields a year.
pub fn extract_year_from_candidates(candidates: &[Option<&str>]) -> Option<String> {
    candidates.iter().flatten().find_map(|c| extract_year_value(c))
}

/// Pull a four-digit year out of a free-form date string.
pub fn extract_year_value(value: &str) -> Option<String> {
    let text = value.trim();
    if let Some(m) = YEAR_RE.find(text) {
        return Some(m.as_str().to_string());
    }
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        return Some(text.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_song() -> Song {
        Song {
            path: PathBuf::from("/music/band/track.mp3"),
            title: "Track".to_string(),
            artist: "Band".to_string(),
            album: "Record".to_string(),
            is_compilation: false,
            length_seconds: Some(185),
            size_bytes: Some(1024),
            year: Some("1999".to_string()),
        }
    }

    #[test]
    fn extract_year_value_reads_embedded_year() {
        assert_eq!(extract_year_value("Released in 2001 remaster").as_deref(), Some("2001"));
    }

    #[test]
    fn extract_year_value_reads_digit_year() {
        assert_eq!(extract_year_value("1998").as_deref(), Some("1998"));
        assert_eq!(extract_year_value("98"), None);
    }

    #[test]
    fn extract_year_value_accepts_bare_four_digits_outside_range() {
        assert_eq!(extract_year_value("1887").as_deref(), Some("1887"));
    }

    #[test]
    fn extract_year_from_candidates_prefers_first_valid() {
        let result =
            extract_year_from_candidates(&[None, Some("nope"), Some("2005"), Some("2012")]);
        assert_eq!(result.as_deref(), Some("2005"));
    }

    #[test]
    fn formatted_length_pads_minutes_and_seconds() {
        assert_eq!(sample_song().formatted_length(), "03:05");
        let song = Song { length_seconds: None, ..sample_song() };
        assert_eq!(song.formatted_length(), "");
    }

    #[test]
    fn one_line_info_includes_length_name_artist_and_year() {
        assert_eq!(
            sample_song().one_line_info(),
            "03:05 | track.mp3 | Artist: Band | (1999)"
        );
    }

    #[test]
    fn multiline_info_lists_compilation_flag() {
        let info = sample_song().multiline_info();
        assert!(info.contains("Title:  Track"));
        assert!(info.contains("Year:   1999"));
        assert!(info.ends_with(".. Compilation: false"));
    }

    #[test]
    fn from_path_falls_back_to_defaults_for_untagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Some Tune.mp3");
        std::fs::write(&path, b"not really audio").unwrap();

        let song = Song::from_path(&path);
        assert_eq!(song.title, "Some Tune");
        assert_eq!(song.artist, UNKNOWN_ARTIST);
        assert_eq!(song.album, UNKNOWN_ALBUM);
        assert_eq!(song.size_bytes, Some(16));
    }

    #[test]
    fn read_tags_rejects_unsupported_extension() {
        let err = Song::read_tags(Path::new("notes.txt")).unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));
    }

    #[test]
    fn same_artist_ignores_case_but_not_unknown() {
        let a = sample_song();
        let b = Song { artist: "BAND".to_string(), ..sample_song() };
        assert!(a.same_artist(&b));

        let u1 = Song { artist: UNKNOWN_ARTIST.to_string(), ..sample_song() };
        let u2 = u1.clone();
        assert!(!u1.same_artist(&u2));
    }
}
