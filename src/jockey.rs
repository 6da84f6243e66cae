//! # Disc Jockey Session
//!
//! The play loop. Each track goes through the same steps:
//!
//! ```text
//! intro (queued or fresh) → print, speak, log → start track
//!     → spawn look-ahead: choose next song, write its intro
//!     → wait for track end (capped in testing mode)
//!     → join look-ahead → advance or stop
//! ```
//!
//! ## Concurrency
//!
//! Exactly one background thread exists at a time. It only touches the
//! library, the model and the web client (all shared through `Arc`), never
//! the audio output, which stays on the session thread. The handle is always
//! joined before its result is used, so a slow model delays the next track
//! instead of racing it. A panic in the look-ahead becomes an error instead
//! of a hang.

use crate::details::WebClient;
use crate::history::HistoryLogger;
use crate::intro::{prepare_intro_text, IntroOptions};
use crate::llm::LanguageModel;
use crate::player::{Player, DEFAULT_POLL};
use crate::prompts::PromptLibrary;
use crate::selector::{choose_next_song, SelectionOptions};
use crate::song::Song;
use crate::tts::{speak_dj_intro, SpeechEngine};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Intros this short are not worth speaking.
const MIN_INTRO_CHARS: usize = 5;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Cut every track off after `preview_seconds`.
    pub testing: bool,
    pub preview_seconds: u64,
    /// Stop after this many tracks.
    pub max_tracks: Option<usize>,
    pub tts_speed: f32,
    pub sample_size: usize,
    pub use_metadata: bool,
    pub attempts: usize,
    pub referee: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            testing: false,
            preview_seconds: 20,
            max_tracks: None,
            tts_speed: 1.2,
            sample_size: 10,
            use_metadata: true,
            attempts: 3,
            referee: false,
        }
    }
}

/// Where the session sends audio.
pub trait Deck {
    /// Speak an intro. Failures are the deck's to log.
    fn announce(&self, intro: &str, speed: f32);

    /// Start a track without blocking.
    fn play(&self, path: &Path) -> Result<()>;

    /// Block until the track ends or `limit` passes. True when cut short.
    fn wait(&self, limit: Option<Duration>) -> bool;
}

/// Speakers and a speech engine.
pub struct LiveDeck {
    player: Player,
    engine: Box<dyn SpeechEngine>,
}

impl LiveDeck {
    pub fn new(player: Player, engine: Box<dyn SpeechEngine>) -> Self {
        Self { player, engine }
    }
}

impl Deck for LiveDeck {
    fn announce(&self, intro: &str, speed: f32) {
        speak_dj_intro(intro, self.engine.as_ref(), speed, &self.player);
    }

    fn play(&self, path: &Path) -> Result<()> {
        println!("Playing song: {}", path.file_name().unwrap_or_default().to_string_lossy());
        self.player.play_file(path)
    }

    fn wait(&self, limit: Option<Duration>) -> bool {
        let cut = self.player.wait_for_end(limit, DEFAULT_POLL);
        if cut {
            if let Some(limit) = limit {
                println!("Testing mode: stopped playback after {} seconds.", limit.as_secs());
            }
        }
        println!("Song finished playing.");
        cut
    }
}

/// The next track with its intro already written.
#[derive(Debug, Clone)]
struct Prepared {
    song: Song,
    intro: String,
}

pub struct DiscJockey {
    library: Arc<Vec<PathBuf>>,
    model: Arc<dyn LanguageModel>,
    web: Option<Arc<dyn WebClient>>,
    prompts: PromptLibrary,
    history: HistoryLogger,
    options: SessionOptions,
}

impl DiscJockey {
    pub fn new(
        library: Vec<PathBuf>,
        model: Arc<dyn LanguageModel>,
        web: Option<Arc<dyn WebClient>>,
        prompts: PromptLibrary,
        history: HistoryLogger,
        options: SessionOptions,
    ) -> Self {
        Self {
            library: Arc::new(library),
            model,
            web,
            prompts,
            history,
            options,
        }
    }

    fn intro_options(&self, previous_title: Option<String>) -> IntroOptions {
        IntroOptions {
            use_metadata: self.options.use_metadata,
            attempts: self.options.attempts,
            previous_title,
            ..IntroOptions::default()
        }
    }

    /// Run the session starting at `start`. Returns the number of tracks played.
    ///
    /// # Errors
    ///
    /// Returns an error if a track cannot be started, a prompt template is
    /// missing, or the look-ahead thread panics.
    pub fn run(&self, deck: &dyn Deck, start: &Path) -> Result<usize> {
        let mut current = Song::from_path(start);
        let mut queued: Option<String> = None;
        let mut previous_title: Option<String> = None;
        let mut played = 0;

        loop {
            let intro = match queued.take() {
                Some(intro) => {
                    info!("Using queued intro for {}", current.file_name());
                    intro
                }
                None => prepare_intro_text(
                    &current,
                    self.model.as_ref(),
                    self.web.as_deref(),
                    &self.prompts,
                    &self.intro_options(previous_title.clone()),
                )?,
            };

            if intro.trim().len() > MIN_INTRO_CHARS {
                println!("DJ Introduction:\n{intro}");
                deck.announce(&intro, self.options.tts_speed);
                if let Err(e) = self.history.log(&current.path, &intro) {
                    warn!("Could not write history: {e:#}");
                }
            } else {
                warn!("No usable intro text; skipping TTS.");
            }

            deck.play(&current.path)
                .with_context(|| format!("Failed to play {}", current.path.display()))?;
            played += 1;

            if self.options.max_tracks.is_some_and(|max| played >= max) {
                deck.wait(self.preview_limit());
                info!("Played {played} tracks; ending session.");
                break;
            }

            let lookahead = self.spawn_lookahead(current.clone());
            deck.wait(self.preview_limit());

            let next = lookahead.join().map_err(|_| {
                anyhow::anyhow!("Look-ahead thread panicked while preparing the next song")
            })??;

            match next {
                Some(prepared) => {
                    println!("Next up: {}", prepared.song.file_name());
                    previous_title = Some(current.title.clone());
                    queued = Some(prepared.intro);
                    current = prepared.song;
                }
                None => {
                    println!("No next song available. Ending session.");
                    break;
                }
            }
        }
        Ok(played)
    }

    fn preview_limit(&self) -> Option<Duration> {
        self.options
            .testing
            .then(|| Duration::from_secs(self.options.preview_seconds))
    }

    fn spawn_lookahead(&self, current: Song) -> JoinHandle<Result<Option<Prepared>>> {
        let library = Arc::clone(&self.library);
        let model = Arc::clone(&self.model);
        let web = self.web.clone();
        let prompts = self.prompts.clone();
        let selection = SelectionOptions {
            attempts: self.options.attempts,
            referee: self.options.referee,
            allow_fallback: true,
        };
        let sample_size = self.options.sample_size;
        let intro_options = self.intro_options(Some(current.title.clone()));

        thread::spawn(move || {
            let model = model.as_ref();
            let result =
                choose_next_song(&current, &library, sample_size, model, &prompts, selection)?;
            let Some(song) = result.song else {
                return Ok(None);
            };
            info!("Preparing next song: {}", song.file_name());
            let intro =
                prepare_intro_text(&song, model, web.as_deref(), &prompts, &intro_options)?;
            Ok(Some(Prepared { song, intro }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDeck {
        events: Mutex<Vec<String>>,
    }

    impl RecordingDeck {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Deck for RecordingDeck {
        fn announce(&self, intro: &str, _speed: f32) {
            self.events.lock().unwrap().push(format!("say:{intro}"));
        }

        fn play(&self, path: &Path) -> Result<()> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.events.lock().unwrap().push(format!("play:{name}"));
            Ok(())
        }

        fn wait(&self, _limit: Option<Duration>) -> bool {
            false
        }
    }

    struct PanickyModel;

    impl LanguageModel for PanickyModel {
        fn name(&self) -> &str {
            "panicky"
        }

        fn query(&self, prompt: &str) -> Result<String> {
            if prompt.contains("Candidates:") {
                panic!("model crashed");
            }
            Ok(ALPHA_INTRO.to_string())
        }
    }

    const ALPHA_INTRO: &str = "<response>Alpha is a bright pop song from the band. \
        It was a hit across the radio.</response>";
    const BETA_INTRO: &str = "<response>Beta brings a slower groove to the evening. \
        Stay tuned for Beta right now.</response>";

    fn library(names: &[&str]) -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = names
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                fs::write(&p, b"x").unwrap();
                p
            })
            .collect();
        (dir, paths)
    }

    fn options(max_tracks: Option<usize>) -> SessionOptions {
        SessionOptions {
            max_tracks,
            use_metadata: false,
            attempts: 1,
            ..SessionOptions::default()
        }
    }

    #[test]
    fn session_plays_queued_tracks_and_logs_history() {
        let (dir, paths) = library(&["alpha.mp3", "beta.mp3"]);
        let model =
            Arc::new(ScriptedModel::new(&[ALPHA_INTRO, "<choice>beta.mp3</choice>", BETA_INTRO]));
        let history = HistoryLogger::new(dir.path().join("history.log"));
        let dj = DiscJockey::new(
            paths.clone(),
            model.clone(),
            None,
            PromptLibrary::default(),
            history.clone(),
            options(Some(2)),
        );
        let deck = RecordingDeck::default();

        let played = dj.run(&deck, &paths[0]).unwrap();
        assert_eq!(played, 2);

        let events = deck.events();
        assert_eq!(events.len(), 4);
        assert!(events[0].starts_with("say:Alpha is a bright pop song"));
        assert_eq!(events[1], "play:alpha.mp3");
        assert!(events[2].starts_with("say:Beta brings a slower groove"));
        assert_eq!(events[3], "play:beta.mp3");

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[2].contains("Previous song was alpha."));

        let log = fs::read_to_string(history.path()).unwrap();
        assert_eq!(log.matches("SONG: ").count(), 2);
    }

    #[test]
    fn session_ends_when_no_next_song() {
        let (dir, paths) = library(&["alpha.mp3"]);
        let model = Arc::new(ScriptedModel::new(&[ALPHA_INTRO]));
        let dj = DiscJockey::new(
            paths.clone(),
            model,
            None,
            PromptLibrary::default(),
            HistoryLogger::new(dir.path().join("history.log")),
            options(None),
        );
        let deck = RecordingDeck::default();
        assert_eq!(dj.run(&deck, &paths[0]).unwrap(), 1);
    }

    #[test]
    fn panicking_lookahead_is_an_error() {
        let (dir, paths) = library(&["alpha.mp3", "beta.mp3"]);
        let dj = DiscJockey::new(
            paths.clone(),
            Arc::new(PanickyModel),
            None,
            PromptLibrary::default(),
            HistoryLogger::new(dir.path().join("history.log")),
            options(None),
        );
        let deck = RecordingDeck::default();
        let err = dj.run(&deck, &paths[0]).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
