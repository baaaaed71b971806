//! Frame-tick orchestration of a loaded project.
//!
//! The player owns the transport, the track and the scenes, and runs one
//! logical tick per [`DemoPlayer::update`]: advance time, extract the rows
//! crossed since the last tick, apply them, and later render whatever is on
//! screen with [`DemoPlayer::render`].

use std::path::Path;

use crate::{
    audio::AudioService,
    config::{EngineConfig, PlaybackConfig},
    gpu::{GpuDevice, ImageHandle},
    project::{AudioClip, ProjectData},
    render::{ActiveScene, FrameParams, RenderGraph, TransitionCompositor, TransitionPreset},
    scene::Scene,
    shader::CompilationService,
    timeline::{
        Beat, DemoTrack, PlaybackEvent, PlaybackService, SceneCommand, Transport, TransportState,
    },
    Result,
};

pub struct DemoPlayer<D, C, A> {
    config: PlaybackConfig,
    service: PlaybackService,
    transport: Transport,
    track: DemoTrack,
    scenes: Vec<Scene>,
    audio_library: Vec<AudioClip>,
    graph: RenderGraph<D, C>,
    compositor: TransitionCompositor,
    audio: A,
    active: ActiveScene,
    /// Transport time at which the current music clip started.
    audio_anchor: Option<f64>,
    /// Scene a transition landed on during the current tick.
    just_completed: Option<ActiveScene>,
}

impl<D, C, A> DemoPlayer<D, C, A>
where
    D: GpuDevice,
    C: CompilationService,
    A: AudioService,
{
    pub fn new(project: ProjectData, config: &EngineConfig, device: D, compiler: C, audio: A) -> Self {
        let tempo = if project.track.tempo > 0.0 {
            project.track.tempo
        } else {
            project.bpm
        };
        let active = initial_scene(&project.scenes);
        Self {
            config: config.playback.clone(),
            service: PlaybackService,
            transport: Transport::new(tempo),
            track: project.track,
            scenes: project.scenes,
            audio_library: project.audio_library,
            graph: RenderGraph::new(device, compiler, &config.render),
            compositor: TransitionCompositor::new(),
            audio,
            active,
            audio_anchor: None,
            just_completed: None,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn track(&self) -> &DemoTrack {
        &self.track
    }

    pub fn track_mut(&mut self) -> &mut DemoTrack {
        &mut self.track
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut [Scene] {
        &mut self.scenes
    }

    pub fn graph(&self) -> &RenderGraph<D, C> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RenderGraph<D, C> {
        &mut self.graph
    }

    pub fn compositor(&self) -> &TransitionCompositor {
        &self.compositor
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn active_scene(&self) -> ActiveScene {
        self.active
    }

    pub fn tempo(&self) -> f32 {
        self.service
            .effective_tempo(&self.transport, self.config.fallback_bpm)
    }

    pub fn exact_beat(&self) -> f64 {
        self.service
            .exact_beat(&self.transport, self.config.fallback_bpm)
    }

    pub fn current_beat(&self) -> Beat {
        self.track.current_beat
    }

    pub fn play(&mut self) {
        self.transport.play();
        if self.audio_anchor.is_some() {
            if let Err(err) = self.audio.play() {
                tracing::warn!(%err, "could not resume music");
            }
        }
        tracing::info!(beat = self.track.current_beat, "playback started");
    }

    pub fn pause(&mut self) {
        self.transport.pause();
        self.audio.pause();
        tracing::info!(beat = self.track.current_beat, "playback paused");
    }

    /// Stops and rewinds to the start of the track.
    pub fn stop(&mut self) {
        self.transport.stop();
        self.track.reset_counters();
        self.compositor.reset();
        self.audio.stop();
        self.audio_anchor = None;
        self.just_completed = None;
        self.active = initial_scene(&self.scenes);
        tracing::info!("playback stopped");
    }

    /// Imports the file textures the scenes bind, resolving paths below `root`.
    pub fn import_textures(&mut self, root: &Path) -> usize {
        self.graph.import_file_bindings(&self.scenes, root)
    }

    /// Compiles every scene before playback starts. A failure leaves the
    /// transport stopped and returns the first compile error.
    pub fn prepare_playback(&mut self) -> Result<()> {
        for scene in &self.scenes {
            if let Err(err) = self.graph.assets().resolve_scene_assets(scene) {
                tracing::warn!(%err, "file binding will sample a placeholder");
            }
        }
        for index in 0..self.scenes.len() {
            if let Err(err) = self.graph.compile_scene(&mut self.scenes, index) {
                tracing::error!(%err, "playback blocked by compile error");
                self.stop();
                return Err(err);
            }
        }
        self.stop();
        self.play();
        Ok(())
    }

    /// Runs one tick and returns the events it applied.
    ///
    /// The first clock sample after a stop has no wall-clock baseline and
    /// advances by the configured `fallback_frame_dt`.
    pub fn update(&mut self, wall_now: f64) -> Vec<PlaybackEvent> {
        let fallback_dt = self.config.fallback_frame_dt;
        if !self.transport.is_playing() {
            self.service
                .advance_clock(&mut self.transport, wall_now, fallback_dt);
            return Vec::new();
        }

        match self.audio_anchor {
            Some(anchor) if self.audio.is_playing() => self.service.advance_clock_from_audio(
                &mut self.transport,
                anchor,
                self.audio.playback_time(),
                wall_now,
            ),
            _ => self
                .service
                .advance_clock(&mut self.transport, wall_now, fallback_dt),
        }

        let mut exact = self.exact_beat();
        let mut current = self
            .service
            .compute_current_beat(&self.transport, self.config.fallback_bpm);

        if let Some(landed) = self.compositor.take_completed(exact, true) {
            self.active = landed;
            self.just_completed = Some(landed);
        }

        let mut applied = Vec::new();
        let length = self.track.length_in_beats;
        if length > 0 && current >= length {
            // Rows on the beats skipped before the end still fire first.
            self.track.current_beat = length - 1;
            if self.fire_rows(length - 1, exact, &mut applied) {
                self.just_completed = None;
                return applied;
            }

            let has_stop_row = self.track.rows().iter().any(|row| row.stop);
            if !self.config.loop_playback || has_stop_row {
                self.halt();
                self.just_completed = None;
                return applied;
            }

            tracing::info!(length, "looping track");
            self.transport.elapsed_seconds = 0.0;
            self.track.reset_counters();
            self.compositor.reset();
            self.audio.stop();
            self.audio_anchor = None;
            self.just_completed = None;
            self.active = initial_scene(&self.scenes);
            exact = 0.0;
            current = 0;
        }
        self.track.current_beat = current;

        self.fire_rows(current, exact, &mut applied);
        self.just_completed = None;
        applied
    }

    /// Applies the rows in `(last_triggered_beat, to]` and commits them.
    /// Returns `true` when a stop row halted playback, which drops the rows
    /// after it.
    fn fire_rows(&mut self, to: Beat, exact_beat: f64, applied: &mut Vec<PlaybackEvent>) -> bool {
        let from = self.track.last_triggered_beat;
        if to <= from {
            return false;
        }
        if self.transport.freeze_beat_counter {
            self.track.last_triggered_beat = to;
            return false;
        }

        for event in self.service.build_playback_events(&self.track, from, to) {
            let beat = event.beat();
            let stopped = matches!(event, PlaybackEvent::Stop { .. });
            self.apply_event(&event, exact_beat);
            applied.push(event);
            if stopped {
                self.track.last_triggered_beat = beat;
                return true;
            }
        }
        self.track.last_triggered_beat = to;
        false
    }

    /// Stops where playback stands. Time, beat and the picture on screen
    /// stay as they are.
    fn halt(&mut self) {
        self.transport.state = TransportState::Stopped;
        self.audio.stop();
        self.audio_anchor = None;
        tracing::info!(
            beat = self.track.current_beat,
            elapsed = self.transport.elapsed_seconds,
            "playback halted"
        );
    }

    fn apply_event(&mut self, event: &PlaybackEvent, exact_beat: f64) {
        tracing::debug!(?event, exact_beat, "applying playback event");
        match event {
            PlaybackEvent::Scene(command) => self.apply_scene_command(command),
            PlaybackEvent::MusicChange { music_index, .. } => self.start_music(*music_index),
            PlaybackEvent::OneShot { one_shot_index, .. } => {
                let Some(path) = self.clip_path(*one_shot_index) else {
                    tracing::warn!(index = one_shot_index, "one-shot clip does not exist");
                    return;
                };
                if let Err(err) = self.audio.play_one_shot(&path) {
                    tracing::warn!(%err, %path, "one-shot failed");
                }
            }
            PlaybackEvent::Stop { beat, .. } => {
                tracing::info!(beat, "stop row reached");
                self.halt();
            }
        }
    }

    fn apply_scene_command(&mut self, command: &SceneCommand) {
        if command.has_transition() {
            self.begin_transition(command);
            return;
        }

        let Some(index) = command.scene_index else {
            return;
        };
        if index >= self.scenes.len() {
            tracing::warn!(index, count = self.scenes.len(), "row names a missing scene");
            return;
        }
        if self
            .just_completed
            .is_some_and(|landed| landed.index == Some(index))
            || self
                .compositor
                .pending_target()
                .is_some_and(|pending| pending.index == Some(index))
        {
            tracing::debug!(index, beat = command.beat, "scene switch already covered by transition");
            return;
        }

        self.compositor.reset();
        self.active = ActiveScene::new(Some(index), command.time_offset, command.beat as f64);
        tracing::info!(scene = index, beat = command.beat, "scene switched");
    }

    fn begin_transition(&mut self, command: &SceneCommand) {
        // The target is resolved from the stem as written; only the blend
        // shader falls back to crossfade.
        let preset = TransitionPreset::from_stem(&command.transition).unwrap_or_else(|| {
            tracing::warn!(stem = %command.transition, "unknown transition, using crossfade");
            TransitionPreset::Crossfade
        });

        let resolution = self.service.resolve_scene_transition_target(
            &self.track,
            command,
            self.active.index,
            self.active.offset,
            self.active.start_beat,
        );
        let target = resolution
            .target_scene
            .filter(|index| *index < self.scenes.len());
        let to = ActiveScene::new(target, resolution.target_offset, resolution.target_start_beat);

        self.compositor.begin(
            self.active,
            to,
            command.beat as f64,
            f64::from(command.transition_duration),
            preset,
        );
    }

    fn start_music(&mut self, index: usize) {
        let Some(clip) = self.audio_library.get(index) else {
            tracing::warn!(index, "music clip does not exist");
            return;
        };
        let path = clip.path.clone();
        if clip.bpm > 0.0 {
            self.transport.tempo = clip.bpm;
        }

        match self.audio.load(&path).and_then(|()| self.audio.play()) {
            Ok(()) => {
                self.audio_anchor = Some(self.transport.elapsed_seconds);
                tracing::info!(%path, tempo = self.transport.tempo, "music started");
            }
            Err(err) => {
                self.audio_anchor = None;
                tracing::warn!(%err, %path, "music failed to start");
            }
        }
    }

    fn clip_path(&self, index: usize) -> Option<String> {
        self.audio_library.get(index).map(|clip| clip.path.clone())
    }

    /// Jumps to `beat` and rebuilds scene, transition and music state from
    /// the rows before it. The landing row fires on the next tick.
    pub fn seek_to_beat(&mut self, beat: Beat) {
        let tempo = self
            .track
            .rows_between(0, beat)
            .iter()
            .rev()
            .filter_map(|row| row.music_index)
            .find_map(|index| self.audio_library.get(index))
            .map(|clip| clip.bpm)
            .filter(|bpm| *bpm > 0.0);
        if let Some(tempo) = tempo {
            self.transport.tempo = tempo;
        }

        self.service
            .seek_to_beat(&mut self.transport, &mut self.track, beat);
        let landed = self.track.current_beat;

        self.compositor.reset();
        self.just_completed = None;
        self.active = initial_scene(&self.scenes);

        let mut prior_music = None;
        for event in self
            .service
            .build_playback_events(&self.track, -1, landed - 1)
        {
            match event {
                PlaybackEvent::Scene(command) => {
                    if let Some(done) = self.compositor.take_completed(command.beat as f64, true) {
                        self.active = done;
                        self.just_completed = Some(done);
                    }
                    self.apply_scene_command(&command);
                    self.just_completed = None;
                }
                PlaybackEvent::MusicChange {
                    beat, music_index, ..
                } => prior_music = Some((beat, music_index)),
                _ => {}
            }
        }
        if let Some(done) = self.compositor.take_completed(landed as f64, true) {
            self.active = done;
        }

        self.audio.stop();
        self.audio_anchor = None;
        if let Some((music_beat, index)) = prior_music {
            self.resume_music_at(music_beat, index);
        }
        tracing::info!(beat = landed, scene = ?self.active.index, "seeked");
    }

    fn resume_music_at(&mut self, music_beat: Beat, index: usize) {
        let Some(path) = self.clip_path(index) else {
            return;
        };
        let anchor = self
            .service
            .beat_to_seconds(music_beat as f64, self.tempo());
        let position = (self.transport.elapsed_seconds - anchor).max(0.0);

        let mut result = self
            .audio
            .load(&path)
            .and_then(|()| self.audio.seek(position));
        if result.is_ok() && self.transport.is_playing() {
            result = self.audio.play();
        }
        match result {
            Ok(()) => self.audio_anchor = Some(anchor),
            Err(err) => tracing::warn!(%err, %path, "could not restore music after seek"),
        }
    }

    /// Renders the current frame. `None` is black.
    pub fn render(&mut self, width: u32, height: u32) -> Option<ImageHandle> {
        self.graph.begin_frame(&mut self.scenes);
        let exact = self.exact_beat();

        let Some(state) = self.compositor.state().copied() else {
            return self.scene_image(self.active, exact, width, height);
        };

        let progress = state.progress(exact);
        let from = self.scene_image(state.from, exact, width, height);
        let from = self.compositor.hold(&mut self.graph, from, width, height);
        let to = if state.to == state.from {
            from
        } else {
            self.scene_image(state.to, exact, width, height)
        };
        self.compositor
            .compose(&mut self.graph, from, to, progress, width, height)
    }

    fn scene_image(
        &mut self,
        scene: ActiveScene,
        exact_beat: f64,
        width: u32,
        height: u32,
    ) -> Option<ImageHandle> {
        let index = scene.index?;
        let tempo = self.tempo();
        let params = FrameParams {
            width,
            height,
            time_seconds: self.service.scene_time_seconds(
                exact_beat,
                scene.start_beat,
                scene.offset,
                tempo,
            ),
            tempo,
            beats_per_bar: self.config.beats_per_bar,
            frame_index: (self.transport.elapsed_seconds * self.config.compute_frame_rate) as u64,
        };
        self.graph.scene_final_image(&mut self.scenes, index, &params)
    }
}

fn initial_scene(scenes: &[Scene]) -> ActiveScene {
    let index = (!scenes.is_empty()).then_some(0);
    ActiveScene::new(index, 0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{ManualAudio, NullAudio},
        gpu::HeadlessDevice,
        shader::HeadlessCompiler,
        timeline::{TrackerRow, TransportState},
    };
    use approx::assert_abs_diff_eq;

    type Player<A> = DemoPlayer<HeadlessDevice, HeadlessCompiler, A>;

    fn project(track: DemoTrack, scenes: usize) -> ProjectData {
        let mut project = ProjectData::default();
        project.scenes = (0..scenes)
            .map(|index| Scene::new(format!("scene{index}"), "fn main() {}"))
            .collect();
        project.track = track;
        project
    }

    /// Ticks without a wall-clock baseline do not advance time.
    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.playback.fallback_frame_dt = 0.0;
        config
    }

    fn player(track: DemoTrack, scenes: usize) -> Player<NullAudio> {
        DemoPlayer::new(
            project(track, scenes),
            &config(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            NullAudio,
        )
    }

    fn scene_events(events: &[PlaybackEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, PlaybackEvent::Scene(_)))
            .count()
    }

    #[test]
    fn scene_row_fires_exactly_once_after_four_seconds() {
        let track = DemoTrack::new(120.0, 16).with_row(TrackerRow::at(8).with_scene(1));
        let mut player = player(track, 2);
        player.play();

        assert!(player.update(0.0).is_empty());
        assert_eq!(player.active_scene().index, Some(0));

        let events = player.update(4.0);
        assert_eq!(scene_events(&events), 1);
        assert_eq!(player.current_beat(), 8);
        assert_eq!(player.active_scene().index, Some(1));
        assert_abs_diff_eq!(player.active_scene().start_beat, 8.0);

        assert!(player.update(4.0).is_empty());
        assert!(player.update(4.1).is_empty());
        assert_eq!(player.active_scene().index, Some(1));
    }

    #[test]
    fn skipped_beats_fire_in_order() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(3).with_scene(1))
            .with_row(TrackerRow::at(5).with_scene(2))
            .with_row(TrackerRow::at(7).with_one_shot(0));
        let mut player = player(track, 3);
        player.play();
        player.update(0.0);

        let beats: Vec<_> = player.update(3.5).iter().map(PlaybackEvent::beat).collect();
        assert_eq!(beats, vec![3, 5, 7]);
        assert_eq!(player.active_scene().index, Some(2));
    }

    #[test]
    fn transition_completes_on_the_target() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(4).with_scene(1).with_transition("crossfade", 4.0));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);

        player.update(2.0);
        assert!(player.compositor().is_active());
        assert_eq!(player.active_scene().index, Some(0));

        player.update(3.0);
        assert_eq!(player.compositor().progress(player.exact_beat()), Some(0.5));

        player.update(4.0);
        assert!(!player.compositor().is_active());
        assert_eq!(player.active_scene().index, Some(1));
        assert_abs_diff_eq!(player.active_scene().start_beat, 4.0);
    }

    #[test]
    fn restated_target_keeps_transition_timing() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(4).with_transition("crossfade", 2.0))
            .with_row(TrackerRow::at(6).with_scene(1).with_offset(3.0));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);

        player.update(2.0);
        assert_eq!(
            player.compositor().pending_target().and_then(|to| to.index),
            Some(1)
        );

        let events = player.update(3.0);
        assert_eq!(scene_events(&events), 1);
        let active = player.active_scene();
        assert_eq!(active.index, Some(1));
        assert_abs_diff_eq!(active.start_beat, 4.0);
        assert_abs_diff_eq!(active.offset, 3.0);
    }

    #[test]
    fn unknown_transition_falls_back_to_crossfade() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(2).with_scene(1).with_transition("swirl", 2.0));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.update(1.0);

        let state = player.compositor().state().copied().unwrap();
        assert_eq!(state.preset, TransitionPreset::Crossfade);
        assert_eq!(state.to.index, Some(1));
    }

    #[test]
    fn unknown_transition_without_scene_stays_on_current_scene() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(2).with_transition("swirl", 2.0))
            .with_row(TrackerRow::at(6).with_scene(1));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.update(1.0);

        let state = player.compositor().state().copied().unwrap();
        assert_eq!(state.preset, TransitionPreset::Crossfade);
        assert_eq!(state.to.index, Some(0));
    }

    #[test]
    fn looping_replays_from_the_first_row() {
        let track = DemoTrack::new(120.0, 4)
            .with_row(TrackerRow::at(0).with_scene(0))
            .with_row(TrackerRow::at(2).with_scene(1));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.update(1.0);
        assert_eq!(player.active_scene().index, Some(1));

        let events = player.update(2.0);
        assert_eq!(scene_events(&events), 1);
        assert_eq!(player.active_scene().index, Some(0));
        assert_eq!(player.transport().elapsed_seconds, 0.0);
        assert!(player.transport().is_playing());
    }

    #[test]
    fn end_of_track_stops_without_looping() {
        let track = DemoTrack::new(120.0, 4);
        let mut config = config();
        config.playback.loop_playback = false;
        let mut player: Player<NullAudio> = DemoPlayer::new(
            project(track, 1),
            &config,
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            NullAudio,
        );
        player.play();
        player.update(0.0);
        player.update(2.5);
        assert_eq!(player.transport().state, TransportState::Stopped);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 2.5);
        assert_eq!(player.current_beat(), 3);

        player.update(3.0);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 2.5);
    }

    #[test]
    fn rows_before_the_end_fire_when_a_tick_wraps() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(0).with_scene(0))
            .with_row(TrackerRow::at(14).with_scene(1))
            .with_row(TrackerRow::at(15).with_one_shot(0));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.update(6.5);
        assert_eq!(player.current_beat(), 13);

        let beats: Vec<_> = player.update(8.1).iter().map(PlaybackEvent::beat).collect();
        assert_eq!(beats, vec![14, 15, 0]);
        assert_eq!(player.active_scene().index, Some(0));
        assert_eq!(player.current_beat(), 0);
        assert!(player.transport().is_playing());
    }

    #[test]
    fn stop_row_on_the_last_beat_wins_over_looping() {
        let track = DemoTrack::new(120.0, 4).with_row(TrackerRow::at(3).with_stop());
        let mut player = player(track, 1);
        player.play();
        player.update(0.0);

        let events = player.update(2.5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].beat(), 3);
        assert_eq!(player.transport().state, TransportState::Stopped);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 2.5);
    }

    #[test]
    fn tracks_with_a_stop_row_never_loop() {
        let track = DemoTrack::new(120.0, 4)
            .with_row(TrackerRow::at(0).with_scene(0))
            .with_row(TrackerRow::at(1).with_stop());
        let mut player = player(track, 1);
        player.seek_to_beat(3);
        assert_eq!(player.track().last_triggered_beat, 2);
        player.play();
        player.update(0.0);

        assert!(player.update(1.0).is_empty());
        assert_eq!(player.transport().state, TransportState::Stopped);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 2.5);
    }

    #[test]
    fn stop_row_halts_and_drops_later_rows() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(2).with_stop())
            .with_row(TrackerRow::at(3).with_scene(1));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);

        let events = player.update(2.0);
        assert_eq!(events.len(), 1);
        assert!(!player.transport().is_playing());
        assert_eq!(player.active_scene().index, Some(0));
        assert_eq!(player.track().last_triggered_beat, 2);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 2.0);
    }

    #[test]
    fn stop_row_keeps_time_and_picture() {
        let track = DemoTrack::new(120.0, 32)
            .with_row(TrackerRow::at(4).with_scene(1).with_transition("crossfade", 8.0))
            .with_row(TrackerRow::at(8).with_stop());
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.update(2.0);
        assert!(player.compositor().is_active());

        let events = player.update(4.0);
        assert!(matches!(events.last(), Some(PlaybackEvent::Stop { beat: 8, .. })));
        assert_eq!(player.transport().state, TransportState::Stopped);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 4.0);
        assert_eq!(player.current_beat(), 8);
        assert_eq!(player.active_scene().index, Some(0));
        assert!(player.compositor().is_active());
        assert_eq!(
            player.compositor().pending_target().and_then(|to| to.index),
            Some(1)
        );
    }

    #[test]
    fn first_tick_advances_by_the_fallback_frame_time() {
        let mut player: Player<NullAudio> = DemoPlayer::new(
            project(DemoTrack::new(120.0, 16), 1),
            &EngineConfig::default(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            NullAudio,
        );
        player.play();
        player.update(5.0);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 1.0 / 60.0, epsilon = 1e-6);

        player.update(5.5);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 0.5 + 1.0 / 60.0, epsilon = 1e-6);
    }

    #[test]
    fn missing_file_textures_do_not_block_playback() {
        let mut project = project(DemoTrack::new(120.0, 16), 0);
        project.scenes.push(
            Scene::new("textured", "fn main() {}")
                .with_binding(crate::scene::TextureBinding::file(0, "missing.png")),
        );
        let mut player: Player<NullAudio> = DemoPlayer::new(
            project,
            &config(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            NullAudio,
        );

        assert!(player.prepare_playback().is_ok());
        assert!(player.transport().is_playing());
        assert!(player.graph().assets().is_empty());
    }

    #[test]
    fn frozen_beat_counter_consumes_rows() {
        let track = DemoTrack::new(120.0, 16).with_row(TrackerRow::at(2).with_scene(1));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);
        player.transport_mut().toggle_freeze_beat();

        assert!(player.update(1.5).is_empty());
        assert_eq!(player.track().last_triggered_beat, 3);
        player.transport_mut().toggle_freeze_beat();
        assert!(player.update(1.6).is_empty());
        assert_eq!(player.active_scene().index, Some(0));
    }

    #[test]
    fn music_rows_drive_time_from_audio() {
        let mut project = project(
            DemoTrack::new(120.0, 64).with_row(TrackerRow::at(0).with_music(0)),
            1,
        );
        project.audio_library.push(AudioClip::music("song.ogg", 140.0));
        let audio = ManualAudio::new();
        let handle = audio.handle();
        let mut player = DemoPlayer::new(
            project,
            &config(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            audio,
        );
        player.play();

        player.update(0.0);
        assert_eq!(handle.loaded().unwrap().as_deref(), Some("song.ogg"));
        assert_eq!(player.tempo(), 140.0);

        handle.advance(1.25).unwrap();
        player.update(0.5);
        assert_abs_diff_eq!(player.transport().elapsed_seconds, 1.25);
    }

    #[test]
    fn seek_rebuilds_transition_in_flight() {
        let track = DemoTrack::new(120.0, 32)
            .with_row(TrackerRow::at(0).with_scene(0))
            .with_row(TrackerRow::at(4).with_scene(1).with_transition("crossfade", 8.0));
        let mut player = player(track, 2);

        player.seek_to_beat(8);
        let state = player.compositor().state().copied().unwrap();
        assert_eq!(state.from.index, Some(0));
        assert_eq!(state.to.index, Some(1));
        assert_eq!(state.progress(player.exact_beat()), 0.5);
        assert_eq!(player.track().last_triggered_beat, 7);

        player.seek_to_beat(13);
        assert!(!player.compositor().is_active());
        assert_eq!(player.active_scene().index, Some(1));

        let elapsed = player.transport().elapsed_seconds;
        player.seek_to_beat(13);
        assert_eq!(player.transport().elapsed_seconds, elapsed);
        assert_eq!(player.current_beat(), 13);
    }

    #[test]
    fn seek_restores_music_position() {
        let mut project = project(
            DemoTrack::new(120.0, 64).with_row(TrackerRow::at(4).with_music(0)),
            1,
        );
        project.audio_library.push(AudioClip::music("song.ogg", 120.0));
        let mut player = DemoPlayer::new(
            project,
            &EngineConfig::default(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            ManualAudio::new(),
        );

        player.seek_to_beat(12);
        assert_abs_diff_eq!(player.audio().playback_time(), 4.0);
        assert!(!player.audio().is_playing());

        player.play();
        assert!(player.audio().is_playing());
    }

    #[test]
    fn compile_errors_block_playback() {
        let mut project = project(DemoTrack::new(120.0, 16), 1);
        project
            .scenes
            .push(Scene::new("broken", "#error missing semicolon\nfn main() {}"));
        let mut player: Player<NullAudio> = DemoPlayer::new(
            project,
            &EngineConfig::default(),
            HeadlessDevice::new(),
            HeadlessCompiler::new(),
            NullAudio,
        );

        assert!(player.prepare_playback().is_err());
        assert_eq!(player.transport().state, TransportState::Stopped);

        player.scenes_mut()[1].set_source("fn main() {}");
        assert!(player.prepare_playback().is_ok());
        assert!(player.transport().is_playing());
    }

    #[test]
    fn renders_active_scene_and_transition_blend() {
        let track = DemoTrack::new(120.0, 16)
            .with_row(TrackerRow::at(2).with_scene(1).with_transition("glitch", 4.0));
        let mut player = player(track, 2);
        player.play();
        player.update(0.0);

        let single = player.render(64, 36);
        assert!(single.is_some());
        assert_eq!(single, player.scenes()[0].output());

        player.update(2.0);
        let draws = player.graph().device().stats().draws;
        let blended = player.render(64, 36);
        assert!(blended.is_some());
        assert_ne!(blended, player.scenes()[0].output());
        assert_ne!(blended, player.scenes()[1].output());
        let stats = player.graph().device().stats();
        assert_eq!(stats.draws, draws + 3);
        assert!(stats.copies >= 1);
    }

    #[test]
    fn empty_projects_render_black() {
        let mut player = player(DemoTrack::new(120.0, 16), 0);
        player.play();
        player.update(0.0);
        assert_eq!(player.active_scene().index, None);
        assert_eq!(player.render(16, 16), None);
    }
}
