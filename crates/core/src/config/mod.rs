use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

pub const DEFAULT_BPM: f32 = 120.0;
pub const DEFAULT_BEATS_PER_BAR: u32 = 4;
pub const DEFAULT_POSTFX_HISTORY_DEPTH: usize = 4;
pub const DEFAULT_MAX_POSTFX_CHAIN: usize = 32;

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderConfig,
    pub playback: PlaybackConfig,
}

impl EngineConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.validate();
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Replaces degenerate values with their defaults.
    pub fn validate(&mut self) {
        self.render.validate();
        self.playback.validate();
    }
}

/// Output resolution and effect-chain limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Ring depth shared by every post-processing effect.
    pub postfx_history_depth: usize,
    pub max_postfx_chain: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            postfx_history_depth: DEFAULT_POSTFX_HISTORY_DEPTH,
            max_postfx_chain: DEFAULT_MAX_POSTFX_CHAIN,
        }
    }
}

impl RenderConfig {
    fn validate(&mut self) {
        let defaults = Self::default();
        if self.width == 0 {
            self.width = defaults.width;
        }
        if self.height == 0 {
            self.height = defaults.height;
        }
        // History occupies channels 1..=7 next to the input on channel 0.
        self.postfx_history_depth = self.postfx_history_depth.clamp(1, 7);
        if self.max_postfx_chain == 0 {
            self.max_postfx_chain = defaults.max_postfx_chain;
        }
    }
}

/// Timing behaviour of the playback orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub fallback_bpm: f32,
    pub beats_per_bar: u32,
    pub loop_playback: bool,
    /// Delta used on the first clock sample, before a wall-clock baseline exists.
    pub fallback_frame_dt: f32,
    /// Rate used to derive the frame counter handed to compute effects.
    pub compute_frame_rate: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fallback_bpm: DEFAULT_BPM,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            loop_playback: true,
            fallback_frame_dt: 1.0 / 60.0,
            compute_frame_rate: 60.0,
        }
    }
}

impl PlaybackConfig {
    fn validate(&mut self) {
        let defaults = Self::default();
        if !(self.fallback_bpm > 0.0) {
            self.fallback_bpm = defaults.fallback_bpm;
        }
        if self.beats_per_bar == 0 {
            self.beats_per_bar = defaults.beats_per_bar;
        }
        if !(self.fallback_frame_dt >= 0.0) {
            self.fallback_frame_dt = defaults.fallback_frame_dt;
        }
        if !(self.compute_frame_rate > 0.0) {
            self.compute_frame_rate = defaults.compute_frame_rate;
        }
    }
}
