//! # Player Module
//!
//! Audio output through `rodio`. One [`Player`] owns the output stream and a
//! single sink that is reused for songs and spoken intros alike.
//!
//! The output stream is not `Send`, so the player lives on the thread that
//! created it. Background work (LLM, web lookups) never touches it.

use anyhow::{Context, Result};
use log::{debug, info};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

/// Poll interval while waiting on playback.
pub const DEFAULT_POLL: Duration = Duration::from_millis(250);

pub struct Player {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
}

impl Player {
    /// Open the default output device.
    ///
    /// # Errors
    ///
    /// Returns an error when no audio device is available.
    pub fn new() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default().context("Failed to open audio output")?;
        let sink = Sink::try_new(&handle).context("Failed to create audio sink")?;
        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink,
        })
    }

    /// Decode `path` and start playing it without blocking.
    ///
    /// Anything still queued is dropped first.
    pub fn play_file(&self, path: &Path) -> Result<()> {
        let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Cannot decode '{}'", path.display()))?;

        if !self.sink.empty() {
            self.sink.clear();
        }
        self.sink.append(source);
        self.sink.play();
        debug!("Playback started: {}", path.display());
        Ok(())
    }

    /// Block until playback finishes or `limit` elapses.
    ///
    /// Returns `true` when the limit cut playback short.
    pub fn wait_for_end(&self, limit: Option<Duration>, poll: Duration) -> bool {
        let start = Instant::now();
        while !self.sink.empty() {
            if let Some(limit) = limit {
                if start.elapsed() >= limit {
                    info!("Stopping playback after {} seconds.", limit.as_secs());
                    self.sink.clear();
                    return true;
                }
            }
            std::thread::sleep(poll);
        }
        false
    }

    /// Drop everything queued. The sink stays usable for the next file.
    pub fn stop(&self) {
        self.sink.clear();
    }

    /// True when nothing is queued or playing.
    pub fn is_empty(&self) -> bool {
        self.sink.empty()
    }

    /// Play a file to completion, or until `timeout`.
    pub fn play_blocking(&self, path: &Path, timeout: Duration) -> Result<()> {
        self.play_file(path)?;
        if self.wait_for_end(Some(timeout), DEFAULT_POLL) {
            log::warn!("Playback timeout reached for {}; audio stopped.", path.display());
        }
        Ok(())
    }
}
