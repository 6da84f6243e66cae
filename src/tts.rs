//! # Text-to-Speech Module
//!
//! Turns an intro into audio and plays it.
//!
//! ## Pipeline
//!
//! ```text
//! intro text → format_intro_for_tts → SpeechEngine::synthesize (raw file)
//!            → sox tempo/volume/silence trim → Player::play_blocking
//! ```
//!
//! ## Engines
//!
//! | Engine | Backend | Output | Notes |
//! |--------|---------|--------|-------|
//! | `say` | macOS `say` | WAV | rate in words per minute |
//! | `gtts` | Google Translate TTS over HTTP | MP3 | 200-char chunks, network needed |
//! | `espeak` | `espeak-ng` or `espeak` | WAV | offline |
//!
//! All intermediate files live in a `TempDir` that is removed when speaking
//! finishes, whether it succeeded or not.

use crate::intro::{strip_fact_lines, strip_leading_boilerplate_sentence};
use crate::library::is_audio_file;
use crate::player::Player;
use anyhow::{Context, Result};
use clap::ValueEnum;
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub const TTS_VOLUME_GAIN: f32 = 1.15;
/// Characters per Google TTS request.
pub const GTTS_CHUNK_CHARS: usize = 200;
/// Words per minute at speed 1.0.
const BASE_WPM: f32 = 150.0;
const MIN_SAY_WPM: u32 = 80;
const MIN_PLAYBACK_SECS: u64 = 5;
const LIST_LOOKAHEAD: usize = 40;

lazy_static! {
    static ref LEADING_CONJUNCTION_RE: Regex =
        Regex::new(r"^\s*(and|or)\s+\w+").expect("static conjunction pattern");
    static ref STANDALONE_CONJUNCTION_RE: Regex =
        Regex::new(r"\b(and|or)\b").expect("static conjunction pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// macOS `say`
    Say,
    /// Google Translate TTS (online)
    Gtts,
    /// espeak-ng / espeak (offline)
    Espeak,
}

impl EngineKind {
    /// `say` on macOS, `espeak` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            EngineKind::Say
        } else {
            EngineKind::Espeak
        }
    }

    pub fn build(self, http_timeout: Duration) -> Result<Box<dyn SpeechEngine>> {
        Ok(match self {
            EngineKind::Say => Box::new(SayEngine),
            EngineKind::Gtts => Box::new(GttsEngine::new(http_timeout)?),
            EngineKind::Espeak => Box::new(EspeakEngine),
        })
    }
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Something that can render text to an audio file.
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Write raw speech audio for `text` into `workdir` and return its path.
    fn synthesize(&self, text: &str, speed: f32, workdir: &Path) -> Result<PathBuf>;
}

fn words_per_minute(speed: f32) -> u32 {
    (BASE_WPM * speed).round().max(1.0) as u32
}

fn run_tool(command: &mut Command, tool: &str) -> Result<()> {
    debug!("Running {command:?}");
    let output = command
        .output()
        .with_context(|| format!("{tool} command not found on this system"))?;
    if !output.status.success() {
        anyhow::bail!(
            "{tool} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn expect_file(path: PathBuf, tool: &str) -> Result<PathBuf> {
    if !path.is_file() {
        anyhow::bail!("{tool} did not produce an audio file");
    }
    Ok(path)
}

/// macOS `say`.
pub struct SayEngine;

impl SpeechEngine for SayEngine {
    fn name(&self) -> &str {
        "say"
    }

    fn synthesize(&self, text: &str, speed: f32, workdir: &Path) -> Result<PathBuf> {
        let out = workdir.join("speech.wav");
        run_tool(&mut Self::command(text, speed, &out), "say")?;
        expect_file(out, "say")
    }
}

impl SayEngine {
    /// 16-bit little-endian WAV, which rodio decodes even without sox.
    fn command(text: &str, speed: f32, out: &Path) -> Command {
        let wpm = words_per_minute(speed).max(MIN_SAY_WPM);
        let mut command = Command::new("say");
        command
            .arg("-r")
            .arg(wpm.to_string())
            .arg("--file-format=WAVE")
            .arg("--data-format=LEI16")
            .arg("-o")
            .arg(out)
            .arg(text);
        command
    }
}

/// `espeak-ng`, falling back to classic `espeak`.
pub struct EspeakEngine;

impl EspeakEngine {
    fn binary() -> Result<PathBuf> {
        which::which("espeak-ng")
            .or_else(|_| which::which("espeak"))
            .context("Neither espeak-ng nor espeak found on PATH")
    }
}

impl SpeechEngine for EspeakEngine {
    fn name(&self) -> &str {
        "espeak"
    }

    fn synthesize(&self, text: &str, speed: f32, workdir: &Path) -> Result<PathBuf> {
        let out = workdir.join("speech.wav");
        let binary = Self::binary()?;
        run_tool(
            Command::new(&binary)
                .arg("-s")
                .arg(words_per_minute(speed).to_string())
                .arg("-w")
                .arg(&out)
                .arg(text),
            "espeak",
        )?;
        expect_file(out, "espeak")
    }
}

/// Google Translate TTS. Speed is applied later by sox.
pub struct GttsEngine {
    client: reqwest::blocking::Client,
}

impl GttsEngine {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to build HTTP client for gTTS")?;
        Ok(Self { client })
    }

    fn chunk_url(chunk: &str, index: usize, total: usize) -> Result<Url> {
        Url::parse_with_params(
            "https://translate.google.com/translate_tts",
            &[
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", "en"),
                ("client", "tw-ob"),
                ("total", &total.to_string()),
                ("idx", &index.to_string()),
                ("textlen", &chunk.chars().count().to_string()),
            ],
        )
        .context("Failed to build gTTS URL")
    }
}

impl SpeechEngine for GttsEngine {
    fn name(&self) -> &str {
        "gtts"
    }

    fn synthesize(&self, text: &str, _speed: f32, workdir: &Path) -> Result<PathBuf> {
        let chunks = chunk_text(text, GTTS_CHUNK_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("Nothing to synthesize");
        }
        let out = workdir.join("speech.mp3");
        let mut file =
            fs::File::create(&out).with_context(|| format!("Cannot create {}", out.display()))?;

        for (index, chunk) in chunks.iter().enumerate() {
            let url = Self::chunk_url(chunk, index, chunks.len())?;
            let response = self
                .client
                .get(url)
                .send()
                .context("gTTS request failed")?
                .error_for_status()
                .context("gTTS returned an error status")?;
            let bytes = response.bytes().context("Reading gTTS audio failed")?;
            file.write_all(&bytes)?;
        }
        file.flush()?;
        expect_file(out, "gTTS")
    }
}

/// Split text into pieces of at most `max_chars`, breaking between words.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            chunks.extend(chars.chunks(max_chars.max(1)).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() {
            word_len
        } else {
            current.chars().count() + 1 + word_len
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Apply tempo, gain and silence trimming with sox.
///
/// When sox is not installed the raw file is returned unchanged, provided
/// the player can decode it.
pub fn process_audio_with_sox(input: &Path, speed: f32, output: &Path) -> Result<PathBuf> {
    let sox = match which::which("sox") {
        Ok(path) => path,
        Err(_) => return unprocessed_speech(input),
    };

    run_tool(
        Command::new(sox)
            .arg(input)
            .arg(output)
            .args(["tempo", &speed.to_string()])
            .args(["vol", &TTS_VOLUME_GAIN.to_string()])
            .args(["silence", "1", "0.1", "1%", "-1", "0.9", "1%"]),
        "sox",
    )?;

    if let Err(e) = fs::remove_file(input) {
        debug!("Could not remove {}: {e}", input.display());
    }
    expect_file(output.to_path_buf(), "sox")
}

/// The raw engine output, when it is in a format the player can decode.
fn unprocessed_speech(input: &Path) -> Result<PathBuf> {
    if !is_audio_file(input) {
        anyhow::bail!(
            "sox not found and {} cannot be played unprocessed; install sox",
            input.display()
        );
    }
    warn!("sox not found on PATH; playing unprocessed speech");
    Ok(input.to_path_buf())
}

/// Synthesize, post-process and play `text`, optionally saving the audio.
pub fn speak_text(
    text: &str,
    engine: &dyn SpeechEngine,
    speed: f32,
    player: &Player,
    save: Option<&Path>,
) -> Result<()> {
    let workdir = tempfile::tempdir().context("Failed to create temp dir for speech")?;
    let raw = engine.synthesize(text, speed, workdir.path())?;
    info!("[tts] Converting '{}' via sox at {speed}x...", raw.display());
    let audio = process_audio_with_sox(&raw, speed, &workdir.path().join("processed.wav"))?;

    let words = text.split_whitespace().count() as u64;
    player.play_blocking(&audio, Duration::from_secs(words.max(MIN_PLAYBACK_SECS)))?;

    if let Some(target) = save {
        fs::copy(&audio, target)
            .with_context(|| format!("Failed to save audio to {}", target.display()))?;
        println!("Saved audio to {}", target.display());
    }
    Ok(())
}

/// Format and speak a DJ intro. Errors are logged, never returned.
pub fn speak_dj_intro(text: &str, engine: &dyn SpeechEngine, speed: f32, player: &Player) {
    let formatted = format_intro_for_tts(text);
    let clean = formatted.trim_matches(|c: char| !c.is_ascii_alphanumeric()).trim();
    if clean.is_empty() {
        info!("No intro text to speak; skipping TTS.");
        return;
    }
    println!("Speaking intro ({} chars) at {speed}x speed...", clean.len());
    if let Err(e) = speak_text(clean, engine, speed, player, None) {
        error!("TTS playback error ({}): {e:#}", engine.name());
    }
}

/// Normalize intro text for speech: one sentence per line, pauses after
/// commas that do not separate list items.
pub fn format_intro_for_tts(text: &str) -> String {
    let trimmed = strip_fact_lines(text);
    let trimmed = strip_leading_boilerplate_sentence(trimmed.trim());
    if trimmed.is_empty() {
        return String::new();
    }

    let normalized = trimmed
        .replace('\u{2014}', ". ")
        .replace("...", ".")
        .replace("..", ".");

    let segments: Vec<&str> = normalized
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return String::new();
    }

    let mut result = segments.join(". ");
    if !result.ends_with('.') {
        result.push('.');
    }
    insert_pacing_linebreaks(&result).replace(". ", ". \n")
}

/// Add a line break after each comma that is not part of a short list.
pub fn insert_pacing_linebreaks(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' && chars.get(i + 1) == Some(&' ') {
            let tail: String = chars[i + 1..].iter().collect();
            if comma_is_list_like(slice_to_sentence_end(&tail)) {
                out.push_str(", ");
            } else {
                out.push_str(", \n");
            }
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Text up to the next `.`, `!` or `?`.
pub fn slice_to_sentence_end(text: &str) -> &str {
    match text.find(['.', '!', '?']) {
        Some(idx) => &text[..idx],
        None => text,
    }
}

/// Heuristic for short lists like "apples, bananas, and pears".
pub fn comma_is_list_like(tail: &str) -> bool {
    let lookahead: String = tail.chars().take(LIST_LOOKAHEAD).collect();
    LEADING_CONJUNCTION_RE.is_match(&lookahead)
        || lookahead.contains(',')
        || STANDALONE_CONJUNCTION_RE.is_match(&lookahead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fact_lines_removes_prefixes() {
        let stripped = strip_fact_lines("FACT: One\nTRIVIA: Two\nKeep this line.");
        assert_eq!(stripped.trim(), "Keep this line.");
    }

    #[test]
    fn boilerplate_openers_are_removed() {
        let cases = [
            ("Ladies and gentlemen, welcome to the show! And now the track.", "And now the track."),
            (
                "Ladies and gentlemen, welcome to the magical world of Disney music! Here we go.",
                "Here we go.",
            ),
            (
                "Ladies and gentlemen, welcome to another fantastic hour of music magic \
                 on our station. Next up.",
                "Next up.",
            ),
            (
                "Ladies and gentlemen, welcome to another enchanting journey \
                 through the world of Disney magic! Next up.",
                "Next up.",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(strip_leading_boilerplate_sentence(input), expected);
        }
    }

    #[test]
    fn slice_to_sentence_end_stops_at_period() {
        assert_eq!(slice_to_sentence_end(" hello world. rest"), " hello world");
        assert_eq!(slice_to_sentence_end("no end"), "no end");
    }

    #[test]
    fn comma_is_list_like_detects_and() {
        assert!(comma_is_list_like(" and pears"));
        assert!(!comma_is_list_like(" rolling through the night"));
    }

    #[test]
    fn insert_pacing_linebreaks_keeps_lists() {
        let text = "apples, bananas, and pears.";
        assert_eq!(insert_pacing_linebreaks(text), text);
    }

    #[test]
    fn insert_pacing_linebreaks_adds_pause() {
        assert!(insert_pacing_linebreaks("Hello, world.").contains(", \n"));
    }

    #[test]
    fn format_intro_for_tts_filters_fact_lines() {
        let normalized = format_intro_for_tts(
            "FACT: One detail.\nLadies and gentlemen, welcome to the show. Hello there.",
        );
        assert!(!normalized.contains("FACT:"));
        assert!(!normalized.contains("Ladies and gentlemen"));
        assert!(normalized.contains("Hello there."));
    }

    #[test]
    fn format_intro_for_tts_splits_sentences_and_dashes() {
        let formatted = format_intro_for_tts("Big news\u{2014}a new single... It rocks! Really?");
        assert_eq!(formatted, "Big news. \na new single. \nIt rocks. \nReally.");
        assert_eq!(format_intro_for_tts(""), "");
        assert_eq!(format_intro_for_tts("FACT: only facts"), "");
    }

    #[test]
    fn chunk_text_respects_limit_and_word_boundaries() {
        let text = "one two three four five six";
        let chunks = chunk_text(text, 9);
        assert_eq!(chunks, vec!["one two", "three", "four five", "six"]);
        assert!(chunk_text("", 10).is_empty());
        assert_eq!(chunk_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn words_per_minute_scales_with_speed() {
        assert_eq!(words_per_minute(1.0), 150);
        assert_eq!(words_per_minute(1.2), 180);
    }

    #[test]
    fn say_writes_wav_at_minimum_rate() {
        let command = SayEngine::command("Hello there", 0.1, Path::new("/tmp/speech.wav"));
        let args: Vec<String> =
            command.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(command.get_program(), "say");
        assert_eq!(args[..2], ["-r", "80"]);
        assert!(args.contains(&"--file-format=WAVE".to_string()));
        assert!(args.contains(&"--data-format=LEI16".to_string()));
        assert!(args.contains(&"/tmp/speech.wav".to_string()));
    }

    #[test]
    fn unprocessed_speech_requires_a_playable_format() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("speech.wav");
        let aiff = dir.path().join("speech.aiff");
        assert_eq!(unprocessed_speech(&wav).unwrap(), wav);

        let err = unprocessed_speech(&aiff).unwrap_err();
        assert!(err.to_string().contains("install sox"));
    }

    #[test]
    fn engine_kind_parses_from_config_names() {
        let kind: EngineKind = serde_json::from_str("\"gtts\"").unwrap();
        assert_eq!(kind, EngineKind::Gtts);
        assert_eq!(EngineKind::Espeak.build(Duration::from_secs(1)).unwrap().name(), "espeak");
    }
}
