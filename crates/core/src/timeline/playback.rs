use super::{Beat, DemoTrack, TrackerRow, Transport, TransportState};
use crate::{config::DEFAULT_BPM, render::TransitionPreset};

/// Absorbs rounding in beat -> seconds -> beat round trips.
const BEAT_EPSILON: f64 = 1e-9;

/// Scene switch and/or transition requested by a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCommand {
    pub beat: Beat,
    pub row_id: Beat,
    pub scene_index: Option<usize>,
    pub transition: String,
    pub transition_duration: f32,
    pub time_offset: f32,
}

impl SceneCommand {
    pub fn has_transition(&self) -> bool {
        !self.transition.is_empty() && self.transition_duration > 0.0
    }
}

/// Single-purpose record derived from one triggered row.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Scene(SceneCommand),
    MusicChange {
        beat: Beat,
        row_id: Beat,
        music_index: usize,
    },
    OneShot {
        beat: Beat,
        row_id: Beat,
        one_shot_index: usize,
    },
    Stop {
        beat: Beat,
        row_id: Beat,
    },
}

impl PlaybackEvent {
    pub fn beat(&self) -> Beat {
        match self {
            PlaybackEvent::Scene(command) => command.beat,
            PlaybackEvent::MusicChange { beat, .. }
            | PlaybackEvent::OneShot { beat, .. }
            | PlaybackEvent::Stop { beat, .. } => *beat,
        }
    }
}

/// Where a transition lands. `target_scene == None` fades to black.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneTransitionResolution {
    pub target_scene: Option<usize>,
    pub target_offset: f32,
    pub target_start_beat: f64,
}

/// Stateless operations over a caller-owned [`Transport`] and [`DemoTrack`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackService;

impl PlaybackService {
    /// Integrates wall-clock time into the transport.
    ///
    /// The first sample after a reset has no baseline and uses `fallback_dt`.
    pub fn advance_clock(&self, transport: &mut Transport, wall_now: f64, fallback_dt: f32) {
        if transport.state != TransportState::Playing || transport.freeze_time {
            transport.last_sampled_wall_seconds = Some(wall_now);
            return;
        }

        let dt = match transport.last_sampled_wall_seconds {
            Some(last) => wall_now - last,
            None => f64::from(fallback_dt),
        };
        transport.elapsed_seconds += dt.max(0.0);
        transport.last_sampled_wall_seconds = Some(wall_now);
    }

    /// Sources elapsed time from the audio device instead of the wall clock.
    ///
    /// `anchor_seconds` is the transport time at which the current clip
    /// started. Time never runs backwards here, so a late audio report holds
    /// the transport instead of re-firing rows.
    pub fn advance_clock_from_audio(
        &self,
        transport: &mut Transport,
        anchor_seconds: f64,
        playback_time: f64,
        wall_now: f64,
    ) {
        transport.last_sampled_wall_seconds = Some(wall_now);
        if transport.state != TransportState::Playing || transport.freeze_time {
            return;
        }
        let audio_elapsed = anchor_seconds + playback_time.max(0.0);
        if audio_elapsed > transport.elapsed_seconds {
            transport.elapsed_seconds = audio_elapsed;
        }
    }

    pub fn effective_tempo(&self, transport: &Transport, fallback_bpm: f32) -> f32 {
        let bpm = if transport.tempo > 0.0 {
            transport.tempo
        } else {
            fallback_bpm
        };
        bpm.max(1.0)
    }

    /// Fractional beat position of the transport.
    pub fn exact_beat(&self, transport: &Transport, fallback_bpm: f32) -> f64 {
        let beats_per_second = f64::from(self.effective_tempo(transport, fallback_bpm)) / 60.0;
        transport.elapsed_seconds * beats_per_second
    }

    pub fn compute_current_beat(&self, transport: &Transport, fallback_bpm: f32) -> Beat {
        (self.exact_beat(transport, fallback_bpm) + BEAT_EPSILON).floor() as Beat
    }

    pub fn beat_to_seconds(&self, beat: f64, bpm: f32) -> f64 {
        beat * 60.0 / f64::from(bpm.max(1.0))
    }

    /// Local clock of a scene that started at `start_beat` with `offset_beats`.
    pub fn scene_time_seconds(
        &self,
        exact_beat: f64,
        start_beat: f64,
        offset_beats: f32,
        bpm: f32,
    ) -> f64 {
        if bpm <= 0.0 {
            return 0.0;
        }
        self.beat_to_seconds(exact_beat - start_beat + f64::from(offset_beats), bpm)
    }

    /// Jumps to `beat` so that the next advance re-fires the landing row once.
    pub fn seek_to_beat(&self, transport: &mut Transport, track: &mut DemoTrack, beat: Beat) {
        if track.length_in_beats <= 0 {
            track.reset_counters();
            return;
        }

        let beat = beat.clamp(0, track.length_in_beats - 1);
        let bpm = if transport.tempo > 0.0 {
            transport.tempo
        } else if track.tempo > 0.0 {
            track.tempo
        } else {
            DEFAULT_BPM
        };

        transport.tempo = bpm;
        transport.elapsed_seconds = self.beat_to_seconds(beat as f64, bpm);
        track.current_beat = beat;
        track.last_triggered_beat = beat - 1;
    }

    pub fn has_music_reference(&self, track: &DemoTrack, music_index: usize) -> bool {
        track
            .rows()
            .iter()
            .any(|row| row.music_index == Some(music_index))
    }

    /// Rows with `from_exclusive < row_id <= to_inclusive`, in beat order.
    pub fn collect_triggered_rows<'a>(
        &self,
        track: &'a DemoTrack,
        from_exclusive: Beat,
        to_inclusive: Beat,
    ) -> Vec<(Beat, &'a TrackerRow)> {
        if to_inclusive <= from_exclusive {
            return Vec::new();
        }
        track
            .rows_between(from_exclusive + 1, to_inclusive)
            .iter()
            .map(|row| (row.row_id, row))
            .collect()
    }

    pub fn build_playback_events(
        &self,
        track: &DemoTrack,
        from_exclusive: Beat,
        to_inclusive: Beat,
    ) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        for (beat, row) in self.collect_triggered_rows(track, from_exclusive, to_inclusive) {
            if row.scene_index.is_some() || row.has_transition() {
                events.push(PlaybackEvent::Scene(SceneCommand {
                    beat,
                    row_id: row.row_id,
                    scene_index: row.scene_index,
                    transition: row.transition.clone(),
                    transition_duration: row.transition_duration,
                    time_offset: row.time_offset,
                }));
            }
            if let Some(music_index) = row.music_index {
                events.push(PlaybackEvent::MusicChange {
                    beat,
                    row_id: row.row_id,
                    music_index,
                });
            }
            if let Some(one_shot_index) = row.one_shot_index {
                events.push(PlaybackEvent::OneShot {
                    beat,
                    row_id: row.row_id,
                    one_shot_index,
                });
            }
            if row.stop {
                events.push(PlaybackEvent::Stop {
                    beat,
                    row_id: row.row_id,
                });
            }
        }
        events
    }

    /// Decides where a transition started by `command` lands.
    ///
    /// A crossfade without a target adopts the next row that names a scene.
    /// Anything else still unresolved, other than a fade-out, transitions
    /// into the current scene. Landing on the current scene keeps its offset
    /// and start beat.
    pub fn resolve_scene_transition_target(
        &self,
        track: &DemoTrack,
        command: &SceneCommand,
        current_scene: Option<usize>,
        current_offset: f32,
        current_start_beat: f64,
    ) -> SceneTransitionResolution {
        let preset = TransitionPreset::from_stem(&command.transition);
        let mut resolution = SceneTransitionResolution {
            target_scene: command.scene_index,
            target_offset: command.time_offset,
            target_start_beat: command.beat as f64,
        };

        if resolution.target_scene.is_none() && preset == Some(TransitionPreset::Crossfade) {
            if let Some(next) = track.next_scene_row(command.beat) {
                resolution.target_scene = next.scene_index;
                resolution.target_offset = next.time_offset;
            }
        }

        if resolution.target_scene.is_none() && preset != Some(TransitionPreset::FadeOut) {
            resolution.target_scene = current_scene;
            resolution.target_offset = current_offset;
            resolution.target_start_beat = current_start_beat;
        } else if resolution.target_scene == current_scene {
            resolution.target_offset = current_offset;
            resolution.target_start_beat = current_start_beat;
        }

        resolution
    }
}
