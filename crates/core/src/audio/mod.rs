//! Audio playback seam.
//!
//! Decoding and output belong to the host. The player only needs to start
//! and stop clips and to read the playback position back, which keeps the
//! visuals locked to the music while it plays.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::{BeatlineError, Result};

pub trait AudioService {
    fn load(&mut self, path: &str) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
    /// Moves the playhead of the loaded clip.
    fn seek(&mut self, seconds: f64) -> Result<()>;
    fn is_playing(&self) -> bool;
    /// Playhead of the loaded clip in seconds.
    fn playback_time(&self) -> f64;
    fn play_one_shot(&mut self, path: &str) -> Result<()>;
}

/// Silent audio service. Never reports playing, so the transport follows
/// the wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl AudioService for NullAudio {
    fn load(&mut self, path: &str) -> Result<()> {
        tracing::debug!(path, "ignoring audio load");
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn seek(&mut self, _seconds: f64) -> Result<()> {
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn playback_time(&self) -> f64 {
        0.0
    }

    fn play_one_shot(&mut self, path: &str) -> Result<()> {
        tracing::debug!(path, "ignoring one-shot");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
struct ManualState {
    loaded: Option<String>,
    playing: bool,
    time: f64,
    loads: Vec<String>,
    one_shots: Vec<String>,
}

/// In-memory audio service whose playhead is moved by hand through a
/// [`ManualAudioHandle`].
#[derive(Debug, Default, Clone)]
pub struct ManualAudio {
    shared: Arc<Mutex<ManualState>>,
}

impl ManualAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ManualAudioHandle {
        ManualAudioHandle {
            shared: self.shared.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ManualState>> {
        lock(&self.shared)
    }
}

fn lock(shared: &Arc<Mutex<ManualState>>) -> Result<MutexGuard<'_, ManualState>> {
    shared
        .lock()
        .map_err(|_| BeatlineError::msg("audio state has been poisoned"))
}

impl AudioService for ManualAudio {
    fn load(&mut self, path: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.loaded = Some(path.to_string());
        state.loads.push(path.to_string());
        state.playing = false;
        state.time = 0.0;
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut state = self.lock()?;
        if state.loaded.is_none() {
            return Err(BeatlineError::msg("no clip loaded"));
        }
        state.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        if let Ok(mut state) = self.lock() {
            state.playing = false;
        }
    }

    fn stop(&mut self) {
        if let Ok(mut state) = self.lock() {
            state.playing = false;
            state.time = 0.0;
        }
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let mut state = self.lock()?;
        state.time = seconds.max(0.0);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.lock().map(|state| state.playing).unwrap_or(false)
    }

    fn playback_time(&self) -> f64 {
        self.lock().map(|state| state.time).unwrap_or(0.0)
    }

    fn play_one_shot(&mut self, path: &str) -> Result<()> {
        self.lock()?.one_shots.push(path.to_string());
        Ok(())
    }
}

/// Shared view used by hosts and tests to drive a [`ManualAudio`].
#[derive(Debug, Clone)]
pub struct ManualAudioHandle {
    shared: Arc<Mutex<ManualState>>,
}

impl ManualAudioHandle {
    /// Advances the playhead while the clip is playing.
    pub fn advance(&self, seconds: f64) -> Result<()> {
        let mut state = lock(&self.shared)?;
        if state.playing {
            state.time += seconds.max(0.0);
        }
        Ok(())
    }

    pub fn loaded(&self) -> Result<Option<String>> {
        Ok(lock(&self.shared)?.loaded.clone())
    }

    pub fn loads(&self) -> Result<Vec<String>> {
        Ok(lock(&self.shared)?.loads.clone())
    }

    pub fn one_shots(&self) -> Result<Vec<String>> {
        Ok(lock(&self.shared)?.one_shots.clone())
    }
}
