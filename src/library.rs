//! # Library Module
//!
//! Scans a music directory for playable files and draws random samples from it.
//! The library is kept as a sorted list of paths. Tags are only read for the
//! small candidate sets that actually get shown or sent to the LLM.

use crate::song::Song;
use anyhow::{Context, Result};
use log::{debug, info};
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Extensions the scanner collects.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg"];

/// Returns true if the path carries a supported audio extension.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect supported audio files from a directory tree, sorted.
///
/// # Errors
///
/// Returns an error if the directory does not exist, cannot be read,
/// or contains no audio files at all.
pub fn get_song_list(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        anyhow::bail!("Music directory not found: {}", directory.display());
    }

    let mut songs = Vec::new();
    collect_audio_files(directory, &mut songs)?;

    if songs.is_empty() {
        anyhow::bail!("No audio files found in {}", directory.display());
    }
    songs.sort();
    info!("Found {} audio files in {}", songs.len(), directory.display());
    Ok(songs)
}

fn collect_audio_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_audio_files(&path, out)?;
        } else if is_audio_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Random sample without replacement. Size is clamped to `1..=len`.
pub fn select_song_list(songs: &[PathBuf], sample_size: usize) -> Vec<PathBuf> {
    if songs.is_empty() {
        return Vec::new();
    }
    let size = sample_size.clamp(1, songs.len());
    songs
        .choose_multiple(&mut rand::thread_rng(), size)
        .cloned()
        .collect()
}

/// Read tags for a candidate set in parallel, preserving input order.
pub fn load_songs(paths: &[PathBuf]) -> Vec<Song> {
    debug!("Loading metadata for {} songs", paths.len());
    paths.par_iter().map(|p| Song::from_path(p)).collect()
}

/// Ask the user to pick a starting song from a random sample.
///
/// Prints a numbered list to `output` and reads answers from `input` until a
/// valid number is entered.
///
/// # Errors
///
/// Returns an error if the library is empty or `input` reaches EOF.
pub fn select_song<R: BufRead, W: Write>(
    songs: &[PathBuf],
    sample_size: usize,
    input: &mut R,
    output: &mut W,
) -> Result<PathBuf> {
    let choices = select_song_list(songs, sample_size);
    if choices.is_empty() {
        anyhow::bail!("Cannot select a song from an empty library");
    }
    let loaded = load_songs(&choices);

    writeln!(output, "Please select a song (1-{}):", loaded.len())?;
    for (index, song) in loaded.iter().enumerate() {
        writeln!(output, "{}: {}", index + 1, song.one_line_info())?;
    }

    let mut line = String::new();
    loop {
        write!(output, "Enter number: ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            anyhow::bail!("No selection made (end of input)");
        }
        if let Ok(n) = line.trim().parse::<usize>() {
            if (1..=choices.len()).contains(&n) {
                return Ok(choices[n - 1].clone());
            }
        }
        writeln!(output, "Please enter a number between 1 and {}.", choices.len())?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn library_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("one.mp3"), b"x").unwrap();
        fs::write(dir.path().join("a/two.FLAC"), b"x").unwrap();
        fs::write(dir.path().join("a/b/three.ogg"), b"x").unwrap();
        fs::write(dir.path().join("a/cover.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        dir
    }

    #[test]
    fn get_song_list_walks_tree_and_filters_extensions() {
        let dir = library_dir();
        let songs = get_song_list(dir.path()).unwrap();
        assert_eq!(songs.len(), 3);
        let mut sorted = songs.clone();
        sorted.sort();
        assert_eq!(songs, sorted);
        assert!(songs.iter().all(|p| is_audio_file(p)));
    }

    #[test]
    fn get_song_list_rejects_missing_directory() {
        let err = get_song_list(Path::new("/definitely/not/here")).unwrap_err();
        assert!(err.to_string().contains("Music directory not found"));
    }

    #[test]
    fn get_song_list_rejects_directory_without_audio() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.md"), b"x").unwrap();
        let err = get_song_list(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No audio files found"));
    }

    #[test]
    fn select_song_list_clamps_size() {
        let songs: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{i}.mp3"))).collect();
        assert_eq!(select_song_list(&songs, 0).len(), 1);
        assert_eq!(select_song_list(&songs, 3).len(), 3);
        assert_eq!(select_song_list(&songs, 50).len(), 5);
        assert!(select_song_list(&[], 4).is_empty());
    }

    #[test]
    fn select_song_list_has_no_duplicates() {
        let songs: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("{i}.mp3"))).collect();
        let mut sample = select_song_list(&songs, 20);
        sample.sort();
        sample.dedup();
        assert_eq!(sample.len(), 20);
    }

    #[test]
    fn select_song_retries_until_valid_number() {
        let dir = library_dir();
        let songs = get_song_list(dir.path()).unwrap();
        let mut input = Cursor::new("zero\n9\n2\n");
        let mut output = Vec::new();

        let chosen = select_song(&songs, 3, &mut input, &mut output).unwrap();
        assert!(songs.contains(&chosen));

        let printed = String::from_utf8(output).unwrap();
        assert!(printed.contains("Please select a song (1-3):"));
        assert_eq!(printed.matches("Please enter a number between 1 and 3.").count(), 2);
    }

    #[test]
    fn select_song_errors_on_eof() {
        let songs = vec![PathBuf::from("/tmp/none.mp3")];
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        assert!(select_song(&songs, 1, &mut input, &mut output).is_err());
    }
}
