//! # Intro Builder
//!
//! Turns song details into a short spoken DJ intro and polices what the model
//! sends back.
//!
//! Local models drift: they leak their fact lists into the answer, open every
//! intro with "Ladies and gentlemen, welcome to…", forget the song title, wrap
//! things in code fences or apologise as an AI. The validators below catch
//! those cases so that every attempt either yields speakable text or is
//! retried.
//!
//! ## Fallback Ladder
//!
//! ```text
//! LLM attempt 1..N  → finalize_intro_text (strict checks)
//!        ↓ all rejected
//! build_relaxed_intro (first sentences of the last answer + title)
//!        ↓ nothing usable
//! template_intro ("Up next, TITLE by ARTIST. Here is TITLE.")
//! ```

use crate::details::{DetailsFetcher, WebClient};
use crate::llm::{extract_response_text, extract_xml_tag, LanguageModel};
use crate::prompts::{PromptLibrary, INTRO_METADATA, INTRO_SIMPLE, INTRO_TEXT};
use crate::song::Song;
use anyhow::Result;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

pub const MIN_SENTENCES: usize = 2;
pub const MAX_SENTENCES: usize = 6;
pub const MAX_INTRO_CHARS: usize = 600;
/// Sentences shorter than this many words are not counted.
const MIN_SENTENCE_WORDS: usize = 4;
const FACT_LINES: usize = 5;
const RELAXED_SENTENCES: usize = 3;

/// Substrings that disqualify an intro outright. Compared in lowercase.
const FORBIDDEN: &[&str] = &[
    "```", "<", ">", "[", "]", "(", ")", "\u{2014}", "as an ai", "i cannot",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "and", "or", "to", "in", "on", "for", "with", "from", "by", "at",
    // edition words
    "soundtrack", "remastered", "remaster", "version", "edit", "mix", "radio", "live", "mono",
    "stereo", "feat", "featuring", "original",
];

lazy_static! {
    static ref BOILERPLATE_RE: Regex =
        RegexBuilder::new(r"^\s*ladies and gentlemen,?\s*welcome to[^.!?]*[.!?]\s*")
        .case_insensitive(true)
        .build()
        .expect("static boilerplate pattern");
    static ref FACT_PREFIX_RE: Regex = RegexBuilder::new(r"^\s*(fact|trivia)\s*:\s*")
        .case_insensitive(true)
        .build()
        .expect("static fact pattern");
    static ref CODE_FENCE_RE: Regex =
        Regex::new(r"```[A-Za-z0-9_-]*").expect("static fence pattern");
    static ref FACTS_BLOCK_RE: Regex = RegexBuilder::new(r"<facts\b[^>]*>.*?(</facts\s*>|$)")
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("static facts pattern");
    static ref TAG_RE: Regex = Regex::new(r"</?[A-Za-z][^>]*>").expect("static tag pattern");
    static ref BRACKETED_RE: Regex =
        Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("static bracket pattern");
    static ref SENTENCE_RE: Regex = Regex::new(r"[^.!?]+[.!?]*").expect("static sentence pattern");
}

/// Knobs for [`prepare_intro_text`].
#[derive(Debug, Clone)]
pub struct IntroOptions {
    /// Look the song up on the web and use the detailed prompt.
    pub use_metadata: bool,
    pub attempts: usize,
    /// Build a relaxed intro from the last answer when every attempt is rejected.
    pub allow_fallback: bool,
    /// Reject intros that do not mention the title instead of appending it.
    pub strict_title: bool,
    pub previous_title: Option<String>,
}

impl Default for IntroOptions {
    fn default() -> Self {
        Self {
            use_metadata: true,
            attempts: 3,
            allow_fallback: true,
            strict_title: false,
            previous_title: None,
        }
    }
}

fn with_transition(prompt: String, previous_title: Option<&str>) -> String {
    match previous_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(prev) => {
            format!("{prompt}\nPrevious song was {prev}. Add a smooth transition reference.")
        }
        None => prompt,
    }
}

/// Detailed prompt with web background and a facts block.
pub fn build_metadata_prompt(
    prompts: &PromptLibrary,
    song: &Song,
    details: &crate::details::SongDetails,
    previous_title: Option<&str>,
) -> Result<String> {
    let prompt = prompts.render(
        INTRO_METADATA,
        &[
            ("title", &song.title),
            ("artist", &song.artist),
            ("details", &details.results()),
        ],
    )?;
    Ok(with_transition(prompt, previous_title))
}

/// Prompt built from tags alone.
pub fn build_simple_prompt(
    prompts: &PromptLibrary,
    song: &Song,
    previous_title: Option<&str>,
) -> Result<String> {
    let prompt =
        prompts.render(INTRO_SIMPLE, &[("title", &song.title), ("artist", &song.artist)])?;
    Ok(with_transition(prompt, previous_title))
}

/// Prompt for a caller-supplied description.
pub fn build_text_prompt(
    prompts: &PromptLibrary,
    raw_text: &str,
    previous_title: Option<&str>,
) -> Result<String> {
    let prompt = prompts.render(INTRO_TEXT, &[("details", raw_text.trim())])?;
    Ok(with_transition(prompt, previous_title))
}

/// Sentences of at least four words.
pub fn estimate_sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.split_whitespace().count() >= MIN_SENTENCE_WORDS)
        .count()
}

/// Lowercase, punctuation removed, whitespace collapsed.
pub fn normalize_sentence(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_fact_line(line: &str) -> String {
    normalize_sentence(&FACT_PREFIX_RE.replace(line, ""))
}

/// Check a `<facts>` body: five prefixed, distinct lines.
///
/// # Errors
///
/// The error names what was wrong with the block.
pub fn validate_facts_block(block: &str) -> std::result::Result<(), String> {
    let lines: Vec<&str> = block.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() != FACT_LINES {
        return Err(format!("expected {FACT_LINES} fact lines, got {}", lines.len()));
    }
    if let Some(bad) = lines.iter().position(|l| !FACT_PREFIX_RE.is_match(l)) {
        return Err(format!("line {} is missing a FACT: or TRIVIA: prefix", bad + 1));
    }
    let mut seen = HashSet::new();
    if !lines.iter().all(|l| seen.insert(normalize_fact_line(l))) {
        return Err("duplicate fact lines".to_string());
    }
    Ok(())
}

/// Significant words of a title.
pub fn title_tokens(title: &str) -> Vec<String> {
    normalize_sentence(title)
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// True when the intro names the title, or enough of its significant words.
pub fn title_is_mentioned(intro: &str, title: &str) -> bool {
    let tokens = title_tokens(title);
    if tokens.is_empty() {
        return true;
    }
    let intro_norm = normalize_sentence(intro);
    let title_norm = normalize_sentence(title);
    if !title_norm.is_empty() && intro_norm.contains(&title_norm) {
        return true;
    }
    let words: HashSet<&str> = intro_norm.split_whitespace().collect();
    let hits = tokens.iter().filter(|t| words.contains(t.as_str())).count();
    hits >= 1 && hits * 2 >= tokens.len()
}

pub fn append_title_if_missing(text: &str, title: &str) -> String {
    let text = text.trim();
    if title.trim().is_empty() || title_is_mentioned(text, title) {
        return text.to_string();
    }
    let closing = format!("Here is {}.", title.trim());
    if text.is_empty() {
        return closing;
    }
    let sep = if text.ends_with(['.', '!', '?']) { " " } else { ". " };
    format!("{text}{sep}{closing}")
}

/// Drop `FACT:`/`TRIVIA:` lines so they are never spoken.
pub(crate) fn strip_fact_lines(text: &str) -> String {
    text.lines()
        .filter(|l| !FACT_PREFIX_RE.is_match(l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reduce raw model output to plain intro prose.
pub fn sanitize_intro_text(raw: &str) -> String {
    let text = CODE_FENCE_RE.replace_all(raw, "").to_string();

    let body = if text.to_ascii_lowercase().contains("<response") {
        match extract_response_text(&text) {
            r if r.is_empty() => text,
            r => r,
        }
    } else {
        text
    };

    let body = FACTS_BLOCK_RE.replace_all(&body, "");
    let untagged = TAG_RE.replace_all(&body, " ");
    strip_fact_lines(&untagged)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn starts_with_boilerplate(text: &str) -> bool {
    BOILERPLATE_RE.is_match(text)
}

/// Remove a leading "Ladies and gentlemen, welcome to…" sentence.
pub fn strip_leading_boilerplate_sentence(text: &str) -> String {
    BOILERPLATE_RE.replace(text, "").trim_start().to_string()
}

/// Cut to at most `max_chars` characters at a word boundary.
pub fn trim_intro(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(idx) => cut[..idx].trim_end().to_string(),
        None => cut,
    }
}

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

fn has_forbidden(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    FORBIDDEN.iter().copied().find(|f| lower.contains(f))
}

/// Validate and tidy one candidate intro.
///
/// Returns `None` when the text should be rejected and another attempt made.
pub fn finalize_intro_text(
    text: &str,
    song_title: &str,
    previous_title: Option<&str>,
    strict: bool,
) -> Option<String> {
    let cleaned = strip_leading_boilerplate_sentence(&sanitize_intro_text(text));
    if cleaned.is_empty() {
        debug!("Intro rejected: empty after sanitizing");
        return None;
    }
    if let Some(bad) = has_forbidden(&cleaned) {
        debug!("Intro rejected: contains {bad:?}");
        return None;
    }
    let count = estimate_sentence_count(&cleaned);
    if count < MIN_SENTENCES {
        debug!("Intro rejected: {count} sentences");
        return None;
    }

    let body = sentences(&cleaned)
        .into_iter()
        .take(MAX_SENTENCES)
        .collect::<Vec<_>>()
        .join(" ");

    if !title_is_mentioned(&body, song_title) {
        let introduces_previous = previous_title
            .filter(|p| !title_tokens(p).is_empty())
            .is_some_and(|p| title_is_mentioned(&body, p));
        if strict || introduces_previous {
            debug!("Intro rejected: title '{song_title}' not mentioned");
            return None;
        }
    }

    // One char is held back for the closing period.
    let intro = close_sentence(&trim_intro(&body, MAX_INTRO_CHARS - 1));
    if title_is_mentioned(&intro, song_title) {
        return Some(intro);
    }
    let room = MAX_INTRO_CHARS.saturating_sub(song_title.chars().count() + 12);
    Some(append_title_if_missing(&close_sentence(&trim_intro(&body, room)), song_title))
}

/// End with `.`, `!` or `?`, dropping a dangling comma or colon first.
fn close_sentence(text: &str) -> String {
    let text = text.trim_end_matches([',', ';', ':', ' ']);
    if text.is_empty() || text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

/// Salvage the first few sentences of a rejected answer.
pub fn build_relaxed_intro(raw: &str, song_title: &str) -> Option<String> {
    let cleaned = sanitize_intro_text(raw);
    let cleaned = BRACKETED_RE.replace_all(&cleaned, "");
    let cleaned: String = cleaned
        .replace('\u{2014}', ", ")
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '[' | ']' | '(' | ')' | '`'))
        .collect();
    let cleaned = strip_leading_boilerplate_sentence(&cleaned);

    let lead = sentences(&cleaned)
        .into_iter()
        .take(RELAXED_SENTENCES)
        .collect::<Vec<_>>()
        .join(" ");
    if lead.split_whitespace().next().is_none() {
        return None;
    }
    let room = MAX_INTRO_CHARS.saturating_sub(song_title.chars().count() + 12);
    Some(append_title_if_missing(&trim_intro(&lead, room), song_title))
}

/// Last-resort intro built from tags.
pub fn template_intro(song: &Song) -> String {
    format!("Up next, {0} by {1}. Here is {0}.", song.title, song.artist)
}

/// Run the attempt loop for a ready prompt.
///
/// Returns `None` when neither a validated nor a relaxed intro came out.
pub fn complete_intro(
    prompt: &str,
    song_title: &str,
    model: &dyn LanguageModel,
    options: &IntroOptions,
) -> Option<String> {
    let previous = options.previous_title.as_deref();
    let mut last_raw = String::new();

    for attempt in 1..=options.attempts.max(1) {
        info!("Sending intro prompt to LLM (attempt {attempt}/{})", options.attempts.max(1));
        let raw = match model.query(prompt) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) => {
                warn!("Intro attempt {attempt}: empty answer");
                continue;
            }
            Err(e) => {
                warn!("Intro attempt {attempt} failed: {e:#}");
                continue;
            }
        };
        debug!("LLM raw output (truncated): {}", raw.chars().take(400).collect::<String>());
        last_raw = raw;

        if last_raw.to_ascii_lowercase().contains("<facts") {
            if let Err(reason) = validate_facts_block(&extract_xml_tag(&last_raw, "facts")) {
                warn!("Intro attempt {attempt}: facts block rejected ({reason})");
                continue;
            }
        }

        let response = match extract_response_text(&last_raw) {
            r if r.is_empty() => last_raw.clone(),
            r => r,
        };
        let accepted = finalize_intro_text(&response, song_title, previous, options.strict_title);
        if let Some(intro) = accepted {
            info!("Intro accepted on attempt {attempt} ({} chars)", intro.len());
            return Some(intro);
        }
        warn!("Intro attempt {attempt}: answer rejected by validation");
    }

    if options.allow_fallback && !last_raw.is_empty() {
        if let Some(intro) = build_relaxed_intro(&last_raw, song_title) {
            warn!("Using relaxed intro built from the last answer");
            return Some(intro);
        }
    }
    None
}

/// Produce an intro for `song`. Never fails because the model misbehaved.
///
/// # Errors
///
/// Only prompt template errors are returned.
pub fn prepare_intro_text(
    song: &Song,
    model: &dyn LanguageModel,
    web: Option<&dyn WebClient>,
    prompts: &PromptLibrary,
    options: &IntroOptions,
) -> Result<String> {
    info!("Gathering song info and building prompt for {}", song.file_name());
    let previous = options.previous_title.as_deref();

    let prompt = match (options.use_metadata, web) {
        (true, Some(client)) => match DetailsFetcher::new(client).fetch(song) {
            Ok(details) => build_metadata_prompt(prompts, song, &details, previous)?,
            Err(e) => {
                warn!("Web lookup failed: {e:#}. Falling back to simple prompt.");
                build_simple_prompt(prompts, song, previous)?
            }
        },
        _ => build_simple_prompt(prompts, song, previous)?,
    };

    Ok(complete_intro(&prompt, &song.title, model, options).unwrap_or_else(|| {
        warn!("No usable intro from the LLM; using template intro");
        template_intro(song)
    }))
}
