//! # Next-Song Selector
//!
//! Picks the track that follows the current one by showing a local LLM a small
//! random sample of the library and parsing its `<choice>` answer.
//!
//! ## Flow
//!
//! ```text
//! sample N paths (never the current one)
//!   → read tags, drop same-artist candidates
//!   → prompt: rank top three, pick one, explain rejections
//!   → resolve <choice> against candidate file names (fuzzy)
//!   → optional referee round when two attempts disagree
//!   → fallback heuristic when nothing resolves
//! ```
//!
//! ## Fuzzy Resolution
//!
//! Small models rarely echo file names exactly. They drop extensions, change
//! case, strip punctuation or paraphrase. Resolution tries progressively looser
//! matches and stops at the first tier that finds something:
//!
//! 1. exact base name
//! 2. normalized equality (lowercase, no extension, alphanumerics only)
//! 3. containment either way
//! 4. best token overlap covering at least half the candidate's tokens

use crate::library::{load_songs, select_song_list, AUDIO_EXTENSIONS};
use crate::llm::{extract_xml_tag, LanguageModel};
use crate::prompts::{PromptLibrary, NEXT_SONG, REFEREE};
use crate::song::{Song, UNKNOWN_ALBUM};
use anyhow::Result;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

/// How many times the sample is redrawn to avoid the current song.
const MAX_RESAMPLES: usize = 10;

/// Text of the reason placeholder in the prompt. Models sometimes echo it.
const REASON_PLACEHOLDER: &str = "WHY YOU PICKED";

/// Shortest normalized choice that may be matched by containment.
const MIN_CONTAINMENT_LEN: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct SelectionOptions {
    /// LLM calls before giving up or falling back.
    pub attempts: usize,
    /// Ask a third prompt to settle two conflicting picks.
    pub referee: bool,
    /// Pick heuristically when no LLM answer resolves.
    pub allow_fallback: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            referee: false,
            allow_fallback: true,
        }
    }
}

/// Outcome of one selection round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    pub song: Option<Song>,
    /// Raw `<choice>` text of the answer that won.
    pub choice_text: String,
    pub reason: String,
}

impl SelectionResult {
    fn empty() -> Self {
        Self::default()
    }
}

/// A resolved answer: candidate index plus the model's explanation.
#[derive(Debug, Clone)]
struct Pick {
    index: usize,
    choice_text: String,
    reason: String,
}

/// Choose the next song for `current` from `library`.
///
/// Returns a result with `song: None` when the library is too small, every
/// candidate was filtered out, or nothing resolved and fallback is disabled.
///
/// # Errors
///
/// Only prompt template errors are returned. LLM failures degrade to the
/// fallback heuristic.
pub fn choose_next_song(
    current: &Song,
    library: &[PathBuf],
    sample_size: usize,
    model: &dyn LanguageModel,
    prompts: &PromptLibrary,
    options: SelectionOptions,
) -> Result<SelectionResult> {
    if library.len() <= 1 {
        debug!("Library has {} songs; nothing to choose from", library.len());
        return Ok(SelectionResult::empty());
    }

    let candidate_paths = sample_without(library, sample_size, &current.path);
    let candidates: Vec<Song> = load_songs(&candidate_paths)
        .into_iter()
        .filter(|song| !song.same_artist(current))
        .collect();

    if candidates.is_empty() {
        warn!("No candidates left after removing songs by {}", current.artist);
        return Ok(SelectionResult::empty());
    }

    println!("Candidates for next song:");
    for song in &candidates {
        println!("{}", song.one_line_info());
    }

    let prompt = prompts.render(
        NEXT_SONG,
        &[
            ("current", &current_line(current)),
            ("candidates", &candidate_lines(&candidates)),
        ],
    )?;

    let picks = collect_picks(&prompt, &candidates, model, options);

    let winner = match picks.as_slice() {
        [] => None,
        [only] => Some(only.clone()),
        [first, second, ..] if first.index == second.index => Some(first.clone()),
        [first, second, ..] => Some(referee(current, &candidates, first, second, model, prompts)),
    };

    if let Some(pick) = winner {
        let song = candidates[pick.index].clone();
        println!("Final next song: {}", song.file_name());
        return Ok(SelectionResult {
            song: Some(song),
            choice_text: pick.choice_text,
            reason: pick.reason,
        });
    }

    if !options.allow_fallback {
        warn!("LLM choice did not match any candidate; no selection made.");
        return Ok(SelectionResult::empty());
    }

    let song = fallback_pick(current, &candidates);
    warn!("LLM choice did not match any candidate; using fallback pick {}", song.file_name());
    Ok(SelectionResult {
        choice_text: song.file_name(),
        reason: fallback_reason(current, &song),
        song: Some(song),
    })
}

fn sample_without(library: &[PathBuf], sample_size: usize, current: &Path) -> Vec<PathBuf> {
    let mut sample = select_song_list(library, sample_size);
    let mut redraws = 0;
    while sample.iter().any(|p| p == current) && redraws < MAX_RESAMPLES {
        sample = select_song_list(library, sample_size);
        redraws += 1;
    }
    sample.retain(|p| p != current);
    sample
}

fn current_line(current: &Song) -> String {
    format!(
        "{} | Artist: {} | Album: {} | Title: {}",
        current.file_name(),
        current.artist.to_lowercase(),
        current.album.to_lowercase(),
        current.title.to_lowercase()
    )
}

fn describe(song: &Song) -> String {
    format!(
        "{} | Artist: {} | Album: {} | Title: {}",
        song.file_name(),
        song.artist,
        song.album,
        song.title
    )
}

fn candidate_lines(candidates: &[Song]) -> String {
    candidates
        .iter()
        .map(|song| format!("- {}", describe(song)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_picks(
    prompt: &str,
    candidates: &[Song],
    model: &dyn LanguageModel,
    options: SelectionOptions,
) -> Vec<Pick> {
    let wanted = if options.referee { 2 } else { 1 };
    let mut picks = Vec::new();

    for attempt in 1..=options.attempts.max(1) {
        let raw = match model.query(prompt) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Selection attempt {attempt} failed: {e:#}");
                continue;
            }
        };

        let choice = extract_xml_tag(&raw, "choice");
        let reason = clean_reason(&extract_xml_tag(&raw, "reason"));
        if !choice.is_empty() {
            info!("LLM choice: {choice}");
        }
        if !reason.is_empty() {
            info!("LLM reason: {reason}");
        }

        match resolve_choice(&choice, candidates) {
            Some(index) => {
                picks.push(Pick { index, choice_text: choice, reason });
                if picks.len() >= wanted {
                    break;
                }
            }
            None => warn!("Attempt {attempt}: choice '{choice}' did not match any candidate"),
        }
    }
    picks
}

/// Drop a reason that only echoes the prompt's placeholder.
fn clean_reason(reason: &str) -> String {
    if reason.to_uppercase().contains(REASON_PLACEHOLDER) {
        String::new()
    } else {
        reason.to_string()
    }
}

fn referee(
    current: &Song,
    candidates: &[Song],
    first: &Pick,
    second: &Pick,
    model: &dyn LanguageModel,
    prompts: &PromptLibrary,
) -> Pick {
    info!(
        "Picks disagree ({} vs {}); asking referee",
        candidates[first.index].file_name(),
        candidates[second.index].file_name()
    );

    let prompt = match prompts.render(
        REFEREE,
        &[
            ("current", &describe(current)),
            ("first", &describe(&candidates[first.index])),
            ("second", &describe(&candidates[second.index])),
        ],
    ) {
        Ok(p) => p,
        Err(e) => {
            warn!("Referee prompt unavailable: {e:#}");
            return first.clone();
        }
    };

    let raw = match model.query(&prompt) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Referee query failed, keeping first pick: {e:#}");
            return first.clone();
        }
    };

    let verdict = extract_xml_tag(&raw, "winner");
    let referee_reason = clean_reason(&extract_xml_tag(&raw, "reason"));
    let mut winner = match verdict.trim().chars().next() {
        Some('2') => second.clone(),
        Some('1') => first.clone(),
        _ => {
            warn!("Referee verdict '{verdict}' unreadable; keeping first pick");
            return first.clone();
        }
    };
    if !referee_reason.is_empty() {
        winner.reason = referee_reason;
    }
    winner
}

fn fallback_pick(current: &Song, candidates: &[Song]) -> Song {
    let same_album = candidates.iter().find(|song| {
        !current.album.eq_ignore_ascii_case(UNKNOWN_ALBUM)
            && song.album.eq_ignore_ascii_case(&current.album)
    });
    same_album
        .or_else(|| candidates.choose(&mut rand::thread_rng()))
        .cloned()
        .unwrap_or_else(|| current.clone())
}

fn fallback_reason(current: &Song, chosen: &Song) -> String {
    if chosen.album.eq_ignore_ascii_case(&current.album)
        && !current.album.eq_ignore_ascii_case(UNKNOWN_ALBUM)
    {
        format!("Fallback pick: shares the album {} with the current song.", current.album)
    } else {
        "Fallback pick: random candidate after the LLM gave no usable choice.".to_string()
    }
}

/// Drop a trailing audio extension. Other dotted suffixes ("Vol. 2") stay.
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > 0 && is_audio_extension(&name[dot + 1..]) => &name[..dot],
        _ => name,
    }
}

fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Lowercase, no extension, alphanumerics only.
pub fn normalize_name(name: &str) -> String {
    strip_extension(name.trim())
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn name_tokens(name: &str) -> Vec<String> {
    strip_extension(name.trim())
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Map a model's `<choice>` text to a candidate index.
pub fn resolve_choice(choice: &str, candidates: &[Song]) -> Option<usize> {
    let choice = choice
        .split('|')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches("- ")
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if choice.is_empty() || candidates.is_empty() {
        return None;
    }

    let names: Vec<String> = candidates.iter().map(Song::file_name).collect();

    if let Some(i) = names.iter().position(|n| n.trim() == choice) {
        return Some(i);
    }

    let wanted = normalize_name(choice);
    if wanted.is_empty() {
        return None;
    }
    let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
    if let Some(i) = normalized.iter().position(|n| *n == wanted) {
        debug!("Resolved '{choice}' by normalized name");
        return Some(i);
    }

    if wanted.len() >= MIN_CONTAINMENT_LEN {
        // Longest shared run wins, then the closest length, then list order.
        let best = normalized
            .iter()
            .enumerate()
            .filter(|(_, n)| n.len() >= MIN_CONTAINMENT_LEN)
            .filter(|(_, n)| n.contains(&wanted) || wanted.contains(n.as_str()))
            .max_by_key(|&(i, n)| {
                (
                    n.len().min(wanted.len()),
                    std::cmp::Reverse(n.len().abs_diff(wanted.len())),
                    std::cmp::Reverse(i),
                )
            });
        if let Some((i, _)) = best {
            debug!("Resolved '{choice}' by containment");
            return Some(i);
        }
    }

    let choice_tokens = name_tokens(choice);
    names
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let tokens = name_tokens(name);
            let overlap = tokens.iter().filter(|t| choice_tokens.contains(t)).count();
            (overlap > 0 && overlap * 2 >= tokens.len()).then_some((i, overlap))
        })
        .max_by_key(|&(i, overlap)| (overlap, std::cmp::Reverse(i)))
        .map(|(i, _)| {
            debug!("Resolved '{choice}' by token overlap");
            i
        })
}
