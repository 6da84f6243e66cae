//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `discjockey` binary.
//!
//! ## Commands
//!
//! - `play`: Run the DJ session loop over a music directory
//! - `next`: Ask the model for the song that should follow a given one
//! - `intro`: Write one DJ intro for a file or a block of text
//! - `details`: Show tags and web background for one file
//! - `speak`: Speak text through a TTS engine
//! - `list`: List the audio files found in a directory
//! - `models`: Show local Ollama models and the memory-based pick
//! - `completion`: Print a shell completion script
//!
//! ## Examples
//!
//! ```bash
//! discjockey play -d ~/Music -t
//! discjockey next -c ~/Music/a.mp3 -d ~/Music --referee
//! discjockey intro -i ~/Music/a.mp3 --simple
//! ```

use crate::tts::EngineKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "discjockey")]
#[command(about = "discjockey: local music with AI-written DJ intros between tracks")]
#[command(version)]
pub struct Args {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// LLM settings shared by the commands that talk to Ollama.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Ollama model to use (default: picked from GPU memory)
    #[arg(long, env = "DISCJOCKEY_MODEL")]
    pub model: Option<String>,

    /// LLM attempts before falling back
    #[arg(long)]
    pub attempts: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the DJ: pick a starting song, then intro and play track after track
    Play {
        /// Music directory containing audio files
        #[arg(short = 'd', long)]
        directory: PathBuf,

        /// Songs sampled for the first pick and for each next-song choice
        #[arg(short = 'n', long)]
        sample_size: Option<usize>,

        /// Speed multiplier for the spoken intro
        #[arg(short = 'r', long)]
        tts_speed: Option<f32>,

        /// Testing mode: play only the first seconds of each song
        #[arg(short = 't', long)]
        testing: bool,

        /// Use the metadata prompt with web background (default)
        #[arg(short = 'm', long, overrides_with = "simple_prompt")]
        metadata_prompt: bool,

        /// Use the simple tag-only prompt
        #[arg(short = 's', long, overrides_with = "metadata_prompt")]
        simple_prompt: bool,

        /// Speech engine
        #[arg(long, value_enum)]
        engine: Option<EngineKind>,

        /// History log location
        #[arg(long)]
        history: Option<PathBuf>,

        /// Stop after this many tracks
        #[arg(long)]
        max_tracks: Option<usize>,

        /// Settle conflicting next-song picks with a referee prompt
        #[arg(long)]
        referee: bool,

        #[command(flatten)]
        llm: ModelArgs,
    },

    /// Choose the song that should follow CURRENT and print it
    Next {
        /// Path to the current song
        #[arg(short = 'c', long)]
        current: PathBuf,

        /// Music directory to sample from
        #[arg(short = 'd', long)]
        directory: PathBuf,

        /// Number of candidates to consider
        #[arg(short = 'n', long, default_value = "16")]
        sample_size: usize,

        /// Settle conflicting picks with a referee prompt
        #[arg(long)]
        referee: bool,

        #[command(flatten)]
        llm: ModelArgs,
    },

    /// Write one DJ intro and print it
    Intro {
        /// Song file for tag and web lookup
        #[arg(short = 'i', long = "input", required_unless_present = "text")]
        input: Option<PathBuf>,

        /// Raw paragraph about a song, used directly
        #[arg(short = 't', long)]
        text: Option<String>,

        /// Skip the web lookup and use the simple prompt
        #[arg(long)]
        simple: bool,

        /// Title of the song played before, for a transition line
        #[arg(long)]
        previous: Option<String>,

        #[command(flatten)]
        llm: ModelArgs,
    },

    /// Print tags and web summaries for one file
    Details {
        /// Song file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Print the intro prompt that would be sent instead of the summaries
        #[arg(long)]
        prompt_only: bool,
    },

    /// Speak text through a TTS engine
    Speak {
        /// Text to speak
        #[arg(short = 't', long, required_unless_present = "file")]
        text: Option<String>,

        /// File whose contents are spoken (appended after --text)
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Speech engine
        #[arg(long, value_enum)]
        engine: Option<EngineKind>,

        /// Playback speed multiplier
        #[arg(long)]
        speed: Option<f32>,

        /// Also save the processed audio here
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// List audio files in a directory with their tags
    List {
        /// Music directory
        #[arg(short = 'd', long)]
        directory: PathBuf,
    },

    /// List local Ollama models and the one memory-based selection would pick
    Models,

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Command {
    /// True when the metadata prompt should be used for `play`.
    pub fn wants_metadata(metadata_prompt: bool, simple_prompt: bool) -> bool {
        metadata_prompt || !simple_prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn play_parses_short_flags() {
        let args = Args::try_parse_from([
            "discjockey", "play", "-d", "/music", "-n", "4", "-t", "-s", "--engine", "gtts",
        ])
        .unwrap();
        match args.command {
            Command::Play {
                directory,
                sample_size,
                testing,
                metadata_prompt,
                simple_prompt,
                engine,
                ..
            } => {
                assert_eq!(directory, PathBuf::from("/music"));
                assert_eq!(sample_size, Some(4));
                assert!(testing);
                assert!(!Command::wants_metadata(metadata_prompt, simple_prompt));
                assert_eq!(engine, Some(EngineKind::Gtts));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn metadata_prompt_is_the_default() {
        assert!(Command::wants_metadata(false, false));
        assert!(Command::wants_metadata(true, false));
    }

    #[test]
    fn intro_requires_input_or_text() {
        assert!(Args::try_parse_from(["discjockey", "intro"]).is_err());
        assert!(Args::try_parse_from(["discjockey", "intro", "-t", "A song about rain"]).is_ok());
    }

    #[test]
    fn verbose_is_global() {
        let args = Args::try_parse_from(["discjockey", "models", "-v"]).unwrap();
        assert!(args.verbose);
    }
}
