//! Transport state and the beat-indexed demo track.

mod playback;

pub use playback::{
    PlaybackEvent, PlaybackService, SceneCommand, SceneTransitionResolution,
};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{config::DEFAULT_BPM, project::optional_index};

/// Integer beat position on the timeline.
pub type Beat = i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transport {
    pub state: TransportState,
    pub elapsed_seconds: f64,
    /// Wall-clock time of the previous clock sample, `None` until the first one.
    pub last_sampled_wall_seconds: Option<f64>,
    pub tempo: f32,
    pub freeze_time: bool,
    /// Time keeps running but no rows fire.
    pub freeze_beat_counter: bool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl Transport {
    pub fn new(tempo: f32) -> Self {
        Self {
            state: TransportState::Stopped,
            elapsed_seconds: 0.0,
            last_sampled_wall_seconds: None,
            tempo,
            freeze_time: false,
            freeze_beat_counter: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn play(&mut self) {
        self.state = TransportState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == TransportState::Playing {
            self.state = TransportState::Paused;
        }
    }

    /// Stops and rewinds to the start of the timeline.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.elapsed_seconds = 0.0;
        self.last_sampled_wall_seconds = None;
    }

    pub fn toggle_freeze_time(&mut self) -> bool {
        self.freeze_time = !self.freeze_time;
        self.freeze_time
    }

    pub fn toggle_freeze_beat(&mut self) -> bool {
        self.freeze_beat_counter = !self.freeze_beat_counter;
        self.freeze_beat_counter
    }
}

/// One beat-indexed directive. Every directive present on a row fires
/// together when its beat is crossed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerRow {
    #[serde(rename = "id")]
    pub row_id: Beat,
    /// `None` holds the current scene.
    #[serde(rename = "scene", with = "optional_index", default)]
    pub scene_index: Option<usize>,
    /// Transition preset stem, empty for none.
    #[serde(rename = "transStem", default)]
    pub transition: String,
    /// Transition length in beats.
    #[serde(rename = "dur", default)]
    pub transition_duration: f32,
    /// Beats added to the target scene's own clock.
    #[serde(rename = "offset", default)]
    pub time_offset: f32,
    #[serde(rename = "music", with = "optional_index", default)]
    pub music_index: Option<usize>,
    #[serde(rename = "oneshot", with = "optional_index", default)]
    pub one_shot_index: Option<usize>,
    #[serde(default)]
    pub stop: bool,
}

impl TrackerRow {
    pub fn at(row_id: Beat) -> Self {
        Self {
            row_id,
            ..Self::default()
        }
    }

    pub fn with_scene(mut self, scene_index: usize) -> Self {
        self.scene_index = Some(scene_index);
        self
    }

    pub fn with_transition(mut self, stem: impl Into<String>, duration_beats: f32) -> Self {
        self.transition = stem.into();
        self.transition_duration = duration_beats;
        self
    }

    pub fn with_offset(mut self, offset_beats: f32) -> Self {
        self.time_offset = offset_beats;
        self
    }

    pub fn with_music(mut self, music_index: usize) -> Self {
        self.music_index = Some(music_index);
        self
    }

    pub fn with_one_shot(mut self, one_shot_index: usize) -> Self {
        self.one_shot_index = Some(one_shot_index);
        self
    }

    pub fn with_stop(mut self) -> Self {
        self.stop = true;
        self
    }

    pub fn has_transition(&self) -> bool {
        !self.transition.is_empty() && self.transition_duration > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoTrack {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "bpm", default = "default_tempo")]
    pub tempo: f32,
    #[serde(rename = "len", default)]
    pub length_in_beats: Beat,
    #[serde(default, deserialize_with = "sorted_rows")]
    rows: Vec<TrackerRow>,
    #[serde(skip)]
    pub current_beat: Beat,
    #[serde(skip, default = "never_triggered")]
    pub last_triggered_beat: Beat,
}

fn default_tempo() -> f32 {
    DEFAULT_BPM
}

fn never_triggered() -> Beat {
    -1
}

fn sorted_rows<'de, D>(deserializer: D) -> Result<Vec<TrackerRow>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut rows = Vec::<TrackerRow>::deserialize(deserializer)?;
    rows.sort_by_key(|row| row.row_id);
    Ok(rows)
}

impl Default for DemoTrack {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, 0)
    }
}

impl DemoTrack {
    pub fn new(tempo: f32, length_in_beats: Beat) -> Self {
        Self {
            name: String::new(),
            tempo,
            length_in_beats,
            rows: Vec::new(),
            current_beat: 0,
            last_triggered_beat: -1,
        }
    }

    /// Rows in ascending beat order. Rows sharing a beat keep insertion order.
    pub fn rows(&self) -> &[TrackerRow] {
        &self.rows
    }

    pub fn insert_row(&mut self, row: TrackerRow) {
        let at = self.rows.partition_point(|existing| existing.row_id <= row.row_id);
        self.rows.insert(at, row);
    }

    pub fn with_row(mut self, row: TrackerRow) -> Self {
        self.insert_row(row);
        self
    }

    /// Removes every row at `beat`, returning how many were dropped.
    pub fn remove_rows_at(&mut self, beat: Beat) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.row_id != beat);
        before - self.rows.len()
    }

    /// Rows whose beat lies in `from..=to`.
    pub fn rows_between(&self, from: Beat, to: Beat) -> &[TrackerRow] {
        if to < from {
            return &[];
        }
        let start = self.rows.partition_point(|row| row.row_id < from);
        let end = self.rows.partition_point(|row| row.row_id <= to);
        &self.rows[start..end]
    }

    /// First row strictly after `beat` that names a scene.
    pub fn next_scene_row(&self, beat: Beat) -> Option<&TrackerRow> {
        let start = self.rows.partition_point(|row| row.row_id <= beat);
        self.rows[start..].iter().find(|row| row.scene_index.is_some())
    }

    pub fn reset_counters(&mut self) {
        self.current_beat = 0;
        self.last_triggered_beat = -1;
    }
}
