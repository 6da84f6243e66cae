//! # discjockey
//!
//! Command-line entry point. Parses arguments, loads the optional config
//! file and routes each subcommand to the library.
//!
//! ## Usage
//!
//! ```bash
//! # Start a session (pick the first song interactively)
//! discjockey play -d ~/Music
//!
//! # Preview mode: 20 seconds per track, tag-only prompts
//! discjockey play -d ~/Music -t -s
//!
//! # One-off tools
//! discjockey next -c ~/Music/a.mp3 -d ~/Music
//! discjockey intro -i ~/Music/a.mp3
//! discjockey speak -t "Testing one two" --engine espeak
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use discjockey::cli::{self, ModelArgs};
use discjockey::config::RuntimeConfig;
use discjockey::details::{DetailsFetcher, HttpClient, WebClient};
use discjockey::history::HistoryLogger;
use discjockey::intro::{self, IntroOptions};
use discjockey::jockey::{DiscJockey, LiveDeck, SessionOptions};
use discjockey::llm::{self, OllamaCli};
use discjockey::player::Player;
use discjockey::prompts::PromptLibrary;
use discjockey::selector::{choose_next_song, SelectionOptions};
use discjockey::song::Song;
use discjockey::{completion, library, tts};
use log::{debug, info};
use path_absolutize::Absolutize;
use std::io;
use std::sync::Arc;

/// Resolve the Ollama model: flag, then config, then memory-based detection.
fn resolve_model(config: &RuntimeConfig, llm_args: &ModelArgs) -> Result<OllamaCli> {
    let name = match llm_args.model.clone().or_else(|| config.model.clone()) {
        Some(name) => name,
        None => llm::select_ollama_model(&config.ollama_bin)?,
    };
    info!("Using Ollama model {name}");
    Ok(OllamaCli::new(config.ollama_bin.clone(), name))
}

fn attempts(config: &RuntimeConfig, llm_args: &ModelArgs) -> usize {
    llm_args.attempts.unwrap_or(config.llm_attempts).max(1)
}

/// Main entry point.
///
/// # Logging
///
/// `RUST_LOG` wins when set. Otherwise the filter is `info`, or `debug`
/// with `--verbose`:
/// - `RUST_LOG=discjockey::selector=debug discjockey next ...`
fn main() -> Result<()> {
    let args = cli::Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = RuntimeConfig::load_default()?;
    debug!("Runtime config: {config:?}");
    let prompts = PromptLibrary::new(config.prompts_dir.clone());

    match args.command {
        cli::Command::Play {
            directory,
            sample_size,
            tts_speed,
            testing,
            metadata_prompt,
            simple_prompt,
            engine,
            history,
            max_tracks,
            referee,
            llm: llm_args,
        } => {
            let songs = library::get_song_list(&directory)?;
            println!("Found {} audio files in {}.", songs.len(), directory.display());

            let model = resolve_model(&config, &llm_args)?;
            let web: Arc<dyn WebClient> = Arc::new(HttpClient::new(config.http_timeout())?);
            let engine = engine.unwrap_or(config.tts_engine).build(config.http_timeout())?;
            let player = Player::new()?;
            let history = HistoryLogger::new(match history {
                Some(path) => path,
                None => config.history_file()?,
            });
            info!("History log: {}", history.path().display());

            let options = SessionOptions {
                testing,
                preview_seconds: config.preview_seconds,
                max_tracks,
                tts_speed: tts_speed.unwrap_or(config.tts_speed),
                sample_size: sample_size.unwrap_or(config.sample_size),
                use_metadata: cli::Command::wants_metadata(metadata_prompt, simple_prompt),
                attempts: attempts(&config, &llm_args),
                referee,
            };

            let start = library::select_song(
                &songs,
                options.sample_size,
                &mut io::stdin().lock(),
                &mut io::stdout(),
            )?;
            println!(
                "Starting with user-selected song: {}",
                start.file_name().unwrap_or_default().to_string_lossy()
            );

            let dj = DiscJockey::new(songs, Arc::new(model), Some(web), prompts, history, options);
            let deck = LiveDeck::new(player, engine);
            let played = dj.run(&deck, &start)?;
            info!("Session finished after {played} tracks");
        }
        cli::Command::Next {
            current,
            directory,
            sample_size,
            referee,
            llm: llm_args,
        } => {
            let current = current
                .absolutize()
                .context("Failed to resolve current song path")?
                .to_path_buf();
            let directory = directory
                .absolutize()
                .context("Failed to resolve music directory")?
                .to_path_buf();

            let mut songs = library::get_song_list(&directory)?;
            if !songs.contains(&current) {
                println!("Current song is not in directory list; adding it for context.");
                songs.push(current.clone());
            }

            let model = resolve_model(&config, &llm_args)?;
            let current_song = Song::from_path(&current);
            println!("CURRENT SONG:\n{}\n{}", current_song.one_line_info(), "=".repeat(60));

            let options = SelectionOptions {
                attempts: attempts(&config, &llm_args),
                referee,
                allow_fallback: false,
            };
            let result =
                choose_next_song(&current_song, &songs, sample_size, &model, &prompts, options)?;
            match result.song {
                Some(song) => {
                    println!("Next song: {}", song.path.display());
                    if !result.reason.is_empty() {
                        println!("Reason: {}", result.reason);
                    }
                }
                None => println!("No selection made."),
            }
        }
        cli::Command::Intro {
            input,
            text,
            simple,
            previous,
            llm: llm_args,
        } => {
            let model = resolve_model(&config, &llm_args)?;
            let options = IntroOptions {
                use_metadata: !simple,
                attempts: attempts(&config, &llm_args),
                previous_title: previous,
                ..IntroOptions::default()
            };

            let intro_text = if let Some(text) = text {
                let previous = options.previous_title.as_deref();
                let prompt = intro::build_text_prompt(&prompts, &text, previous)?;
                intro::complete_intro(&prompt, "", &model, &options)
                    .ok_or_else(|| anyhow::anyhow!("No usable intro returned by the model"))?
            } else {
                let input = input
                    .ok_or_else(|| anyhow::anyhow!("Provide a song file (-i) or raw text (-t)."))?;
                let song = Song::from_path(&input);
                let web = HttpClient::new(config.http_timeout())?;
                intro::prepare_intro_text(&song, &model, Some(&web), &prompts, &options)?
            };
            println!("DJ Intro:\n{intro_text}");
        }
        cli::Command::Details { input, prompt_only } => {
            let song = Song::read_tags(&input)?;
            println!("{}", song.multiline_info());

            let web = HttpClient::new(config.http_timeout())?;
            let details = DetailsFetcher::new(&web).fetch(&song)?;
            if prompt_only {
                println!("{}", intro::build_metadata_prompt(&prompts, &song, &details, None)?);
            } else {
                println!("{}", details.results());
            }
        }
        cli::Command::Speak {
            text,
            file,
            engine,
            speed,
            save,
        } => {
            let mut spoken = text.unwrap_or_default();
            if let Some(file) = file {
                let contents = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                if !spoken.is_empty() {
                    spoken.push(' ');
                }
                spoken.push_str(&contents);
            }
            if spoken.trim().is_empty() {
                anyhow::bail!("Provide text via --text or --file.");
            }

            let kind = engine.unwrap_or(config.tts_engine);
            let speed = speed.unwrap_or(config.tts_speed);
            let engine = kind.build(config.http_timeout())?;
            let player = Player::new()?;
            println!("Using engine '{}' at speed {speed}.", engine.name());
            tts::speak_text(spoken.trim(), engine.as_ref(), speed, &player, save.as_deref())?;
        }
        cli::Command::List { directory } => {
            let songs = library::get_song_list(&directory)?;
            for song in library::load_songs(&songs) {
                println!("{}", song.one_line_info());
            }
        }
        cli::Command::Models => {
            let models = llm::list_ollama_models(&config.ollama_bin)?;
            println!("Local models:");
            for model in &models {
                println!("  {model}");
            }
            match llm::get_vram_size_in_gb() {
                Some(gb) => {
                    let pick = llm::model_for_memory(gb);
                    let status = if models.iter().any(|m| m == pick) {
                        "installed"
                    } else {
                        "not installed"
                    };
                    println!("Detected {gb} GB; automatic selection picks {pick} ({status}).");
                }
                None => {
                    println!("Unable to detect GPU or unified memory; pass --model explicitly.")
                }
            }
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            let shell = completion::shell_to_completion_shell(&shell);
            completion::generate_completions(shell, &mut cmd);
        }
    }

    Ok(())
}
