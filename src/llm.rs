//! # LLM Module
//!
//! Talks to a local Ollama install through the `ollama` command-line tool and
//! pulls structured answers back out of free-form model output.
//!
//! ## Design Decision: CLI vs HTTP API
//!
//! Like the rest of the external tooling (sox, say, espeak), Ollama is driven
//! as a subprocess. `ollama run MODEL PROMPT` prints the completion and exits,
//! so no server protocol handling is needed here.
//!
//! ## Tag Extraction
//!
//! Models are asked to wrap answers in XML-like tags (`<choice>`, `<reason>`,
//! `<response>`). Small models frequently forget the closing tag or repeat a
//! tag while "thinking", so extraction always takes the *last* occurrence and
//! auto-closes a dangling opening tag.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};
use std::process::Command;
use std::time::Duration;

/// Pause between failed LLM attempts.
const RETRY_PAUSE: Duration = Duration::from_millis(250);

/// Anything that can turn a prompt into text.
///
/// The pipeline only depends on this trait so that tests can script answers.
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn name(&self) -> &str;

    /// Send one prompt and return the raw completion.
    fn query(&self, prompt: &str) -> Result<String>;
}

/// Ollama driven through its CLI.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    binary: String,
    model: String,
}

impl OllamaCli {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
        }
    }
}

impl LanguageModel for OllamaCli {
    fn name(&self) -> &str {
        &self.model
    }

    fn query(&self, prompt: &str) -> Result<String> {
        info!("Sending prompt to LLM with model {}...", self.model);
        debug!("Prompt ({} chars):\n{prompt}", prompt.len());

        let output = Command::new(&self.binary)
            .args(["run", &self.model, prompt])
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is Ollama installed?", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Ollama error: {}", stderr.trim());
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("LLM response length: {} characters.", text.len());
        Ok(text)
    }
}

/// Query with retries on errors and empty output.
///
/// # Errors
///
/// Returns the last error once `attempts` calls have failed. Empty output on
/// every attempt is reported as an error as well.
pub fn query_with_retries(
    model: &dyn LanguageModel,
    prompt: &str,
    attempts: usize,
) -> Result<String> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match model.query(prompt) {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {
                warn!("LLM attempt {attempt}/{attempts} returned nothing");
                last_error = Some(anyhow::anyhow!("model {} returned empty output", model.name()));
            }
            Err(e) => {
                warn!("LLM attempt {attempt}/{attempts} failed: {e:#}");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            std::thread::sleep(RETRY_PAUSE);
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no LLM attempts were made")))
}

/// List locally available Ollama models.
///
/// # Errors
///
/// Returns an error if the binary is missing or the service is not responding.
pub fn list_ollama_models(binary: &str) -> Result<Vec<String>> {
    let output = Command::new(binary)
        .arg("list")
        .output()
        .with_context(|| format!("Failed to execute '{binary} list'"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => "Ollama service not responding.",
            s => s,
        };
        anyhow::bail!("Ollama unavailable: {message}");
    }

    Ok(parse_model_list(&String::from_utf8_lossy(&output.stdout)))
}

/// First column of every line after the header.
pub fn parse_model_list(stdout: &str) -> Vec<String> {
    stdout
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Model tier for a given amount of GPU or unified memory.
pub fn model_for_memory(memory_gb: u64) -> &'static str {
    match memory_gb {
        gb if gb > 30 => "gpt-oss:20b",
        gb if gb > 14 => "phi4:14b-q4_K_M",
        gb if gb > 4 => "llama3.2:3b-instruct-q5_K_M",
        _ => "llama3.2:1b-instruct-q4_K_M",
    }
}

/// Pick a model that fits this machine and make sure it is installed.
///
/// # Errors
///
/// Returns an error if memory cannot be detected, Ollama is unavailable, or
/// the chosen model has not been pulled yet.
pub fn select_ollama_model(binary: &str) -> Result<String> {
    let memory = get_vram_size_in_gb().ok_or_else(|| {
        anyhow::anyhow!(
            "Unable to detect VRAM/unified memory for model selection. Pass --model explicitly."
        )
    })?;
    let available = list_ollama_models(binary)?;
    let model = model_for_memory(memory);
    info!("Detected {memory} GB of model memory; selecting {model}");

    if !available.iter().any(|m| m == model) {
        let display = if available.is_empty() {
            "none".to_string()
        } else {
            available.join(", ")
        };
        anyhow::bail!(
            "Required model '{model}' not found locally. \
             Available models: {display}. Try: ollama pull {model}"
        );
    }
    Ok(model.to_string())
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

fn first_capture_u64(pattern: &str, text: &str) -> Option<u64> {
    Regex::new(pattern)
        .ok()?
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Detect GPU VRAM, or unified memory on Apple silicon, in GB.
pub fn get_vram_size_in_gb() -> Option<u64> {
    if cfg!(target_os = "macos") {
        let arch = command_stdout("uname", &["-m"])?;
        if arch.trim().starts_with("arm64") {
            let info = command_stdout("system_profiler", &["SPHardwareDataType"])?;
            return first_capture_u64(r"Memory:\s(\d+)\s?GB", &info);
        }
        let info = command_stdout("system_profiler", &["SPDisplaysDataType"])?;
        return first_capture_u64(r"VRAM.*?: (\d+)\s?MB", &info).map(|mb| mb / 1024);
    }

    if let Some(out) = command_stdout(
        "nvidia-smi",
        &["--query-gpu=memory.total", "--format=csv,noheader,nounits"],
    ) {
        if let Some(mb) = out.lines().filter_map(|l| l.trim().parse::<u64>().ok()).max() {
            return Some(mb / 1024);
        }
    }

    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    first_capture_u64(r"MemTotal:\s+(\d+)\s+kB", &meminfo).map(|kb| kb / (1024 * 1024))
}

fn tag_regex(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    RegexBuilder::new(&format!(r"<{tag}\b[^>]*>(.*?)</{tag}\b[^>]*>"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

/// Extract the body of the last `<tag>…</tag>` in `raw`.
///
/// A dangling opening tag is auto-closed at the end of the text. Returns an
/// empty string when the tag is absent.
pub fn extract_xml_tag(raw: &str, tag: &str) -> String {
    if raw.is_empty() || tag.is_empty() {
        return String::new();
    }

    let lower = raw.to_ascii_lowercase();
    let tag_lower = tag.to_ascii_lowercase();
    let mut text = raw.to_string();
    if lower.contains(&format!("<{tag_lower}")) && !lower.contains(&format!("</{tag_lower}")) {
        text.push_str(&format!("</{tag}>"));
    }

    let Some(re) = tag_regex(tag) else {
        return String::new();
    };
    re.captures_iter(&text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Body of the last `<response>` block, auto-closed if needed.
pub fn extract_response_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let lower = raw.to_ascii_lowercase();
    let Some(start) = lower.rfind("<response") else {
        return String::new();
    };

    let mut tail = raw[start..].to_string();
    if !tail.trim_end().to_ascii_lowercase().ends_with("</response>") {
        tail.push_str("</response>");
    }

    tag_regex("response")
        .and_then(|re| re.captures(&tail))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;

    #[test]
    fn extract_xml_tag_reads_simple_choice() {
        let raw = "<choice>song.mp3</choice><reason>Good flow</reason>";
        assert_eq!(extract_xml_tag(raw, "choice"), "song.mp3");
        assert_eq!(extract_xml_tag(raw, "reason"), "Good flow");
    }

    #[test]
    fn extract_xml_tag_prefers_last_match() {
        let raw = "<response>One</response> junk <response>Two</response>";
        assert_eq!(extract_xml_tag(raw, "response"), "Two");
    }

    #[test]
    fn extract_xml_tag_handles_missing_close() {
        assert_eq!(extract_xml_tag("<response>Hello there", "response"), "Hello there");
    }

    #[test]
    fn extract_xml_tag_is_case_insensitive_and_multiline() {
        let raw = "<CHOICE id=\"1\">\n  a.flac\n</Choice>";
        assert_eq!(extract_xml_tag(raw, "choice"), "a.flac");
    }

    #[test]
    fn extract_xml_tag_returns_empty_when_missing() {
        assert_eq!(extract_xml_tag("no tags here", "response"), "");
        assert_eq!(extract_xml_tag("", "response"), "");
    }

    #[test]
    fn extract_response_text_accepts_trailing_missing_close() {
        assert_eq!(extract_response_text("prefix <response>Hello there"), "Hello there");
    }

    #[test]
    fn extract_response_text_uses_last_block() {
        let raw = "<response>draft</response>\n<response>final</response>";
        assert_eq!(extract_response_text(raw), "final");
    }

    #[test]
    fn extract_response_text_returns_empty_when_missing() {
        assert_eq!(extract_response_text(""), "");
        assert_eq!(extract_response_text("just words"), "");
    }

    #[test]
    fn parse_model_list_skips_header() {
        let stdout = "NAME                ID      SIZE   MODIFIED\n\
                      llama3.2:1b-instruct-q4_K_M  abc  1 GB  2 days ago\n\
                      phi4:14b-q4_K_M  def  9 GB  1 week ago\n";
        assert_eq!(
            parse_model_list(stdout),
            vec!["llama3.2:1b-instruct-q4_K_M", "phi4:14b-q4_K_M"]
        );
    }

    #[test]
    fn model_for_memory_tiers() {
        assert_eq!(model_for_memory(64), "gpt-oss:20b");
        assert_eq!(model_for_memory(16), "phi4:14b-q4_K_M");
        assert_eq!(model_for_memory(8), "llama3.2:3b-instruct-q5_K_M");
        assert_eq!(model_for_memory(4), "llama3.2:1b-instruct-q4_K_M");
    }

    #[test]
    fn query_with_retries_skips_empty_answers() {
        let model = ScriptedModel::new(&["", "  ", "<response>ok</response>"]);
        let text = query_with_retries(&model, "hi", 3).unwrap();
        assert_eq!(text, "<response>ok</response>");
        assert_eq!(model.prompt_count(), 3);
    }

    #[test]
    fn query_with_retries_reports_last_error() {
        let model = ScriptedModel::failing();
        let err = query_with_retries(&model, "hi", 2).unwrap_err();
        assert!(err.to_string().contains("empty output"));
    }

    #[test]
    fn ollama_cli_reports_missing_binary() {
        let model = OllamaCli::new("definitely-not-ollama-binary", "tiny");
        assert!(model.query("hello").is_err());
        assert_eq!(model.name(), "tiny");
    }
}
