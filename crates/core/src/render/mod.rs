//! Scene render graph.
//!
//! Scenes are evaluated depth-first through their texture bindings. A stack
//! of scenes currently being rendered breaks dependency cycles: a scene that
//! is already on the stack keeps last frame's image for this frame.

mod effects;
mod resources;
mod transition;

pub use effects::EffectChainProcessor;
pub use resources::{ChainKind, HistoryRing, ResourceTable};
pub use transition::{ActiveScene, TransitionCompositor, TransitionPreset, TransitionState};

use std::{collections::HashSet, path::Path};

use crate::{
    assets::AssetStore,
    beat::BeatClock,
    config::RenderConfig,
    gpu::{
        FragmentPass, FrameUniforms, GpuDevice, ImageDesc, ImageHandle, PipelineHandle,
        PipelineKind, CHANNEL_COUNT,
    },
    scene::{BindingKind, Scene, ShaderSlot},
    shader::{compile_unit, CompilationService, CompileMode, CompileRequest, CompileState, Diagnostic},
    BeatlineError, Result,
};

/// Everything a scene needs to know about the frame it is rendered in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub width: u32,
    pub height: u32,
    /// Scene-local time.
    pub time_seconds: f64,
    pub tempo: f32,
    pub beats_per_bar: u32,
    /// Frame counter handed to compute effects.
    pub frame_index: u64,
}

impl FrameParams {
    pub fn new(width: u32, height: u32, time_seconds: f64) -> Self {
        Self {
            width,
            height,
            time_seconds,
            tempo: crate::config::DEFAULT_BPM,
            beats_per_bar: crate::config::DEFAULT_BEATS_PER_BAR,
            frame_index: 0,
        }
    }

    pub fn uniforms(&self) -> FrameUniforms {
        let mut clock = BeatClock::new(self.tempo, self.beats_per_bar);
        clock.update(self.time_seconds);
        FrameUniforms::from_clock(&clock, self.width, self.height)
    }
}

pub(crate) enum BuildOutcome {
    Built {
        pipeline: PipelineHandle,
        bytes: usize,
    },
    Failed(Vec<Diagnostic>),
}

/// Compiles `request` and turns the bytecode into a pipeline.
pub(crate) fn compile_pipeline<D, C>(
    device: &mut D,
    compiler: &mut C,
    request: &CompileRequest<'_>,
    kind: PipelineKind,
) -> BuildOutcome
where
    D: GpuDevice + ?Sized,
    C: CompilationService + ?Sized,
{
    let shader = match compile_unit(compiler, request) {
        Ok(shader) => shader,
        Err(diagnostics) => return BuildOutcome::Failed(diagnostics),
    };
    for warning in &shader.warnings {
        tracing::debug!(unit = request.label, %warning, "shader warning");
    }
    match device.create_pipeline(kind, &shader) {
        Ok(pipeline) => BuildOutcome::Built {
            pipeline,
            bytes: shader.byte_size(),
        },
        Err(err) => BuildOutcome::Failed(vec![Diagnostic::error(err.to_string())]),
    }
}

/// Applies a build result to `slot`. A failure keeps the previous pipeline.
pub(crate) fn commit_pipeline<D>(
    device: &mut D,
    slot: &mut ShaderSlot,
    outcome: BuildOutcome,
    label: &str,
) -> bool
where
    D: GpuDevice + ?Sized,
{
    match outcome {
        BuildOutcome::Built { pipeline, bytes } => {
            if let Some(previous) = slot.pipeline.replace(pipeline) {
                device.destroy_pipeline(previous);
            }
            slot.compiled_bytes = bytes;
            slot.state = CompileState::Clean;
            tracing::debug!(unit = label, bytes, "pipeline ready");
            true
        }
        BuildOutcome::Failed(diagnostics) => {
            tracing::warn!(
                unit = label,
                diagnostics = diagnostics.len(),
                first = diagnostics.first().map(|d| d.message.as_str()).unwrap_or(""),
                "shader failed to compile"
            );
            slot.state = CompileState::Error(diagnostics);
            false
        }
    }
}

pub struct RenderGraph<D, C> {
    device: D,
    compiler: C,
    mode: CompileMode,
    assets: AssetStore,
    effects: EffectChainProcessor,
    render_stack: Vec<usize>,
    generation: u64,
}

impl<D, C> RenderGraph<D, C>
where
    D: GpuDevice,
    C: CompilationService,
{
    pub fn new(device: D, compiler: C, config: &RenderConfig) -> Self {
        let generation = device.generation();
        Self {
            device,
            compiler,
            mode: CompileMode::Live,
            assets: AssetStore::new(),
            effects: EffectChainProcessor::new(config),
            render_stack: Vec::new(),
            generation,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetStore {
        &mut self.assets
    }

    pub fn effects(&self) -> &EffectChainProcessor {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectChainProcessor {
        &mut self.effects
    }

    pub fn compile_mode(&self) -> CompileMode {
        self.mode
    }

    pub fn set_compile_mode(&mut self, mode: CompileMode) {
        self.mode = mode;
    }

    /// Per-frame housekeeping: reacts to device loss and drops resources of
    /// effects and scenes that no longer exist.
    pub fn begin_frame(&mut self, scenes: &mut [Scene]) {
        self.render_stack.clear();

        let generation = self.device.generation();
        if generation != self.generation {
            tracing::warn!(
                old = self.generation,
                new = generation,
                "device changed, rebuilding pipelines and history"
            );
            self.generation = generation;
            self.effects.resources_mut().forget();
            self.assets.clear();
            for scene in scenes.iter_mut() {
                scene.invalidate_pipelines();
            }
        }

        let live: HashSet<_> = scenes.iter().flat_map(Scene::effect_ids).collect();
        self.effects
            .resources_mut()
            .retain_effects(&mut self.device, &live);
        self.effects
            .resources_mut()
            .retain_scenes(&mut self.device, scenes.len());
    }

    /// Explicitly compiles a scene and its effects.
    ///
    /// Scene failures are returned. Effect failures are recorded on the
    /// effect and logged; they only make the effect pass its input through.
    pub fn compile_scene(&mut self, scenes: &mut [Scene], index: usize) -> Result<()> {
        let count = scenes.len();
        let scene = scenes
            .get_mut(index)
            .ok_or(BeatlineError::SceneIndex { index, count })?;

        scene.shader.state = CompileState::Compiling;
        let outcome = compile_pipeline(
            &mut self.device,
            &mut self.compiler,
            &scene.compile_request(self.mode),
            PipelineKind::Fragment,
        );
        let compiled = commit_pipeline(&mut self.device, &mut scene.shader, outcome, &scene.name);

        self.effects
            .compile_effects(&mut self.device, &mut self.compiler, self.mode, scene);

        if compiled {
            tracing::info!(scene = %scene.name, bytes = scene.shader.compiled_bytes, "scene compiled");
            Ok(())
        } else {
            Err(BeatlineError::Compile {
                unit: scene.name.clone(),
                diagnostics: scene.shader.state.diagnostics().to_vec(),
            })
        }
    }

    /// Renders `index` and its dependencies. Returns `true` when the scene's
    /// image was written this call.
    pub fn render_scene(&mut self, scenes: &mut [Scene], index: usize, params: &FrameParams) -> bool {
        if index >= scenes.len() || self.render_stack.contains(&index) {
            return false;
        }
        self.render_stack.push(index);
        let rendered = self.render_on_stack(scenes, index, params);
        self.render_stack.pop();
        rendered
    }

    fn render_on_stack(&mut self, scenes: &mut [Scene], index: usize, params: &FrameParams) -> bool {
        for dependency in scenes[index].scene_dependencies(index) {
            self.render_scene(scenes, dependency, params);
        }

        // Compile before touching any image so a failure leaves last frame intact.
        if scenes[index].shader.needs_build() {
            let scene = &mut scenes[index];
            scene.shader.state = CompileState::Compiling;
            let outcome = compile_pipeline(
                &mut self.device,
                &mut self.compiler,
                &scene.compile_request(self.mode),
                PipelineKind::Fragment,
            );
            if !commit_pipeline(&mut self.device, &mut scene.shader, outcome, &scene.name) {
                return false;
            }
        }
        let Some(pipeline) = scenes[index].shader.pipeline else {
            return false;
        };

        let target = match self.ensure_output(&mut scenes[index], params) {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(scene = %scenes[index].name, %err, "could not allocate scene output");
                return false;
            }
        };

        let channels = self.resolve_channels(scenes, index);
        let pass = FragmentPass {
            pipeline,
            target,
            channels,
            uniforms: params.uniforms(),
        };
        if let Err(err) = self.device.draw_fullscreen(&pass) {
            tracing::warn!(scene = %scenes[index].name, %err, "scene draw failed");
            return false;
        }
        true
    }

    fn ensure_output(&mut self, scene: &mut Scene, params: &FrameParams) -> Result<ImageHandle> {
        if let Some(output) = scene.output {
            match self.device.image_desc(output) {
                Some(desc)
                    if desc.matches_size(params.width, params.height)
                        && desc.dimension == scene.output_dimension =>
                {
                    return Ok(output);
                }
                _ => {
                    self.device.destroy_image(output);
                    scene.output = None;
                }
            }
        }
        let output = self.device.create_image(ImageDesc::render_target(
            params.width,
            params.height,
            scene.output_dimension,
        ))?;
        scene.output = Some(output);
        Ok(output)
    }

    /// Resolves the eight channel slots of `scenes[index]`, substituting a
    /// black image of the declared dimensionality for anything unusable.
    fn resolve_channels(&mut self, scenes: &[Scene], index: usize) -> [ImageHandle; CHANNEL_COUNT] {
        let scene = &scenes[index];
        let mut channels = [self.device.placeholder(Default::default()); CHANNEL_COUNT];

        for (channel, slot) in channels.iter_mut().enumerate() {
            let declared = scene.declared_dimension(channel);
            let bound = scene
                .binding_for_channel(channel)
                .and_then(|binding| match binding.kind {
                    BindingKind::Scene => binding
                        .source_scene
                        .filter(|source| *source != index)
                        .and_then(|source| scenes.get(source))
                        .and_then(Scene::output)
                        .filter(|image| {
                            self.device
                                .image_desc(*image)
                                .is_some_and(|desc| desc.dimension == binding.dimension)
                        }),
                    BindingKind::File => self.assets.resolve(&binding.file_path, binding.dimension),
                });

            *slot = match bound {
                Some(image) => image,
                None => {
                    if scene.binding_for_channel(channel).is_some() {
                        tracing::debug!(scene = %scene.name, channel, ?declared, "binding replaced by placeholder");
                    }
                    self.device.placeholder(declared)
                }
            };
        }
        channels
    }

    /// Renders a scene and runs its effect chains. This is the image handed
    /// to presentation or to the transition compositor.
    pub fn scene_final_image(
        &mut self,
        scenes: &mut [Scene],
        index: usize,
        params: &FrameParams,
    ) -> Option<ImageHandle> {
        self.render_scene(scenes, index, params);
        let scene = scenes.get_mut(index)?;
        let output = scene.output?;
        Some(self.effects.apply(
            &mut self.device,
            &mut self.compiler,
            self.mode,
            index,
            scene,
            output,
            params,
        ))
    }

    /// Imports a stand-in for every enabled file binding whose path exists
    /// below `root`. Returns how many textures were imported.
    pub fn import_file_bindings(&mut self, scenes: &[Scene], root: &Path) -> usize {
        let mut imported = 0;
        for binding in scenes.iter().flat_map(|scene| &scene.bindings) {
            if !binding.enabled || binding.kind != BindingKind::File {
                continue;
            }
            if self.assets.resolve(&binding.file_path, binding.dimension).is_some() {
                continue;
            }
            let file = root.join(&binding.file_path);
            match self.assets.import_stand_in(
                &mut self.device,
                &binding.file_path,
                &file,
                binding.dimension,
            ) {
                Ok(_) => imported += 1,
                Err(err) => tracing::warn!(%err, path = %binding.file_path, "texture not imported"),
            }
        }
        imported
    }

    /// Builds a pipeline for a unit that lives outside the scene list.
    pub(crate) fn build_into(
        &mut self,
        slot: &mut ShaderSlot,
        request: &CompileRequest<'_>,
        kind: PipelineKind,
    ) -> bool {
        slot.state = CompileState::Compiling;
        let outcome = compile_pipeline(&mut self.device, &mut self.compiler, request, kind);
        commit_pipeline(&mut self.device, slot, outcome, request.label)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RenderConfig,
        gpu::{headless::BLACK, HeadlessDevice, ImageUsage, TextureDimension},
        scene::TextureBinding,
        shader::HeadlessCompiler,
    };

    const OK: &str = "fn main() {}";

    fn graph() -> RenderGraph<HeadlessDevice, HeadlessCompiler> {
        RenderGraph::new(HeadlessDevice::new(), HeadlessCompiler::new(), &RenderConfig::default())
    }

    fn params() -> FrameParams {
        FrameParams::new(64, 32, 1.5)
    }

    #[test]
    fn renders_dependencies_first() {
        let mut graph = graph();
        let mut scenes = vec![
            Scene::new("main", OK).with_binding(TextureBinding::scene(0, 1)),
            Scene::new("source", OK),
        ];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));

        let source = scenes[1].output().unwrap();
        let pass = graph.device().last_pass().unwrap();
        assert_eq!(pass.target, scenes[0].output().unwrap());
        assert_eq!(pass.channels[0], source);
        assert_eq!(graph.device().stats().draws, 2);
    }

    #[test]
    fn mutual_references_terminate() {
        let mut graph = graph();
        let mut scenes = vec![
            Scene::new("a", OK).with_binding(TextureBinding::scene(0, 1)),
            Scene::new("b", OK).with_binding(TextureBinding::scene(0, 0)),
        ];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));
        assert_eq!(graph.device().stats().draws, 2);
        let first = graph.device().content(scenes[0].output().unwrap());

        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));
        assert_eq!(graph.device().stats().draws, 4);
        let second = graph.device().content(scenes[0].output().unwrap());
        assert!(first.is_some() && second.is_some());
    }

    #[test]
    fn self_reference_binds_placeholder() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("feedback", OK).with_binding(TextureBinding::scene(0, 0))];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));
        let channel = graph.device().last_pass().unwrap().channels[0];
        assert_eq!(graph.device().content(channel), Some(BLACK));
    }

    #[test]
    fn dimension_mismatch_binds_matching_placeholder() {
        let mut graph = graph();
        let mut scenes = vec![
            Scene::new("sky", OK)
                .with_binding(TextureBinding::scene(1, 1).with_dimension(TextureDimension::Cube))
                .with_binding(TextureBinding::scene(2, 2).with_dimension(TextureDimension::Cube)),
            Scene::new("flat", OK),
            Scene::new("cube", OK).with_output_dimension(TextureDimension::Cube),
        ];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));

        let pass = *graph.device().last_pass().unwrap();
        let mismatched = graph.device().image_desc(pass.channels[1]).unwrap();
        assert_eq!(mismatched.dimension, TextureDimension::Cube);
        assert_eq!(mismatched.usage, ImageUsage::Sampled);
        assert_eq!(graph.device().content(pass.channels[1]), Some(BLACK));
        assert_eq!(pass.channels[2], scenes[2].output().unwrap());
        assert_eq!(
            graph.device().image_desc(pass.channels[7]).unwrap().dimension,
            TextureDimension::D2
        );
    }

    #[test]
    fn failed_compile_leaves_previous_frame_untouched() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("a", OK)];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));
        let output = scenes[0].output().unwrap();
        let before = graph.device().content(output);

        scenes[0].set_source("#error broken");
        graph.begin_frame(&mut scenes);
        assert!(!graph.render_scene(&mut scenes, 0, &FrameParams::new(64, 32, 9.0)));
        assert_eq!(graph.device().content(output), before);
        assert!(scenes[0].compile_state().is_error());
        assert!(scenes[0].has_pipeline());

        // The old pipeline keeps rendering until the source changes again.
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &FrameParams::new(64, 32, 9.0)));
        assert_eq!(graph.compiler().compile_count(), 2);
    }

    #[test]
    fn scene_without_pipeline_in_error_is_not_retried() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("a", "#error nope")];
        for _ in 0..3 {
            graph.begin_frame(&mut scenes);
            assert!(!graph.render_scene(&mut scenes, 0, &params()));
        }
        assert_eq!(graph.compiler().compile_count(), 1);
        assert!(scenes[0].output().is_none());
    }

    #[test]
    fn explicit_compile_reports_diagnostics() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("bad", "#error missing brace")];
        let err = graph.compile_scene(&mut scenes, 0).unwrap_err();
        assert!(matches!(err, BeatlineError::Compile { ref diagnostics, .. } if diagnostics.len() == 1));
        assert!(matches!(
            graph.compile_scene(&mut scenes, 4),
            Err(BeatlineError::SceneIndex { index: 4, count: 1 })
        ));
    }

    #[test]
    fn output_is_recreated_on_resize() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("a", OK)];
        graph.begin_frame(&mut scenes);
        graph.render_scene(&mut scenes, 0, &params());
        let small = scenes[0].output().unwrap();

        graph.begin_frame(&mut scenes);
        graph.render_scene(&mut scenes, 0, &FrameParams::new(128, 64, 0.0));
        let large = scenes[0].output().unwrap();
        assert_ne!(small, large);
        assert!(graph.device().image_desc(small).is_none());
    }

    #[test]
    fn file_bindings_resolve_through_assets() {
        let mut graph = graph();
        let image = graph
            .device_mut()
            .create_image(ImageDesc::render_target(4, 4, TextureDimension::D2))
            .unwrap();
        graph.assets_mut().register("noise.png", image, TextureDimension::D2);

        let mut scenes = vec![Scene::new("a", OK)
            .with_binding(TextureBinding::file(0, "noise.png"))
            .with_binding(TextureBinding::file(1, "missing.png"))];
        graph.begin_frame(&mut scenes);
        graph.render_scene(&mut scenes, 0, &params());
        let pass = graph.device().last_pass().unwrap();
        assert_eq!(pass.channels[0], image);
        assert_eq!(graph.device().content(pass.channels[1]), Some(BLACK));
    }

    #[test]
    fn device_loss_rebuilds_scene_pipelines() {
        let mut graph = graph();
        let mut scenes = vec![Scene::new("a", OK)];
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));

        graph.device_mut().reset();
        graph.begin_frame(&mut scenes);
        assert!(graph.render_scene(&mut scenes, 0, &params()));
        assert_eq!(graph.compiler().compile_count(), 2);
        assert_eq!(graph.generation(), graph.device().generation());
    }

    #[test]
    fn imports_file_bindings_that_exist_on_disk() {
        let root = std::env::temp_dir().join(format!("beatline-import-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("sky.dds"), b"dds").unwrap();

        let mut graph = graph();
        let scenes = vec![Scene::new("a", OK)
            .with_binding(TextureBinding::file(0, "sky.dds").with_dimension(TextureDimension::Cube))
            .with_binding(TextureBinding::file(1, "gone.png"))];
        let imported = graph.import_file_bindings(&scenes, &root);
        let _ = std::fs::remove_dir_all(&root);

        assert_eq!(imported, 1);
        assert!(graph.assets().resolve("sky.dds", TextureDimension::Cube).is_some());
        assert!(graph.assets().resolve("gone.png", TextureDimension::D2).is_none());
        assert_eq!(graph.import_file_bindings(&scenes, Path::new("/nonexistent")), 0);
    }
}
