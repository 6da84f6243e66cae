//! Plays local audio files and puts AI-written DJ intros between tracks.
//!
//! Core modules:
//! - [`library`] - Music directory scanning and random sampling
//! - [`song`] - Tag metadata and display helpers
//! - [`details`] - Web background lookup (Wikipedia, Last.fm, AllMusic)
//! - [`selector`] - LLM-driven next-song choice
//! - [`intro`] - Intro prompts, validation and fallbacks
//! - [`tts`] - Speech synthesis engines and text pacing
//! - [`jockey`] - The session loop with one look-ahead thread
//!
//! ### Supporting Modules
//!
//! - [`llm`] - Ollama CLI wrapper, model selection, tag extraction
//! - [`prompts`] - Prompt templates with user overrides
//! - [`player`] - rodio playback
//! - [`history`] - Append-only history log
//! - [`config`] - Data directory and config file
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use discjockey::{intro, llm, prompts::PromptLibrary, song::Song};
//! use std::path::Path;
//!
//! let song = Song::from_path(Path::new("/music/band/track.mp3"));
//! let model_name = llm::select_ollama_model("ollama")?;
//! let model = llm::OllamaCli::new("ollama", model_name);
//!
//! let options = intro::IntroOptions { use_metadata: false, ..Default::default() };
//! let text = intro::prepare_intro_text(&song, &model, None, &PromptLibrary::default(), &options)?;
//! println!("{text}");
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Failure Model
//!
//! Only setup problems are fatal: a missing music directory, an empty
//! library, no audio device or no usable Ollama model. Everything the LLM or
//! the web does wrong degrades to a fallback (fuzzy matching, a heuristic
//! pick, a relaxed or template intro) and is logged.
//!
//! ## Testing
//!
//! The LLM, web and audio seams are traits ([`llm::LanguageModel`],
//! [`details::WebClient`], [`jockey::Deck`]), so the whole pipeline runs in
//! tests without network or sound. Live model checks run only with
//! `LLM_SMOKE=1`.

pub mod cli;
pub mod completion;
pub mod config;
pub mod details;
pub mod history;
pub mod intro;
pub mod jockey;
pub mod library;
pub mod llm;
pub mod player;
pub mod prompts;
pub mod selector;
pub mod song;
pub mod tts;
