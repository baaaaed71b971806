use super::{
    commit_pipeline, compile_pipeline,
    resources::{ChainKind, ResourceTable},
    FrameParams,
};
use crate::{
    config::RenderConfig,
    gpu::{
        dispatch_groups, ComputeDispatch, ComputeParams, FragmentPass, GpuDevice, ImageHandle,
        PipelineHandle, PipelineKind, TextureDimension, CHANNEL_COUNT, MAX_COMPUTE_HISTORY,
    },
    scene::{ComputeEffect, PostFxEffect, Scene},
    shader::{CompilationService, CompileMode, CompileState},
};

/// Runs a scene's post-processing chain, then its compute chain.
///
/// Each chain ping-pongs between two scratch images owned by the
/// `(scene, chain)` pair. History rings belong to individual effects and
/// survive frames in which the effect fails to compile.
#[derive(Debug)]
pub struct EffectChainProcessor {
    resources: ResourceTable,
    history_depth: usize,
    max_chain: usize,
}

impl EffectChainProcessor {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            resources: ResourceTable::new(),
            history_depth: config.postfx_history_depth.clamp(1, CHANNEL_COUNT - 1),
            max_chain: config.max_postfx_chain.max(1),
        }
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.resources
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Compiles every effect of `scene` that needs it.
    pub fn compile_effects<D, C>(
        &mut self,
        device: &mut D,
        compiler: &mut C,
        mode: CompileMode,
        scene: &mut Scene,
    ) where
        D: GpuDevice + ?Sized,
        C: CompilationService + ?Sized,
    {
        for effect in &mut scene.post_fx {
            build_post_fx(device, compiler, mode, effect);
        }
        for effect in &mut scene.compute_effects {
            build_compute(device, compiler, mode, effect);
        }
    }

    /// Transforms `input` through both chains and returns the final image.
    #[allow(clippy::too_many_arguments)]
    pub fn apply<D, C>(
        &mut self,
        device: &mut D,
        compiler: &mut C,
        mode: CompileMode,
        scene_index: usize,
        scene: &mut Scene,
        input: ImageHandle,
        params: &FrameParams,
    ) -> ImageHandle
    where
        D: GpuDevice + ?Sized,
        C: CompilationService + ?Sized,
    {
        let after_post = self.apply_post_fx(device, compiler, mode, scene_index, scene, input, params);
        self.apply_compute(device, compiler, mode, scene_index, scene, after_post, params)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_post_fx<D, C>(
        &mut self,
        device: &mut D,
        compiler: &mut C,
        mode: CompileMode,
        scene_index: usize,
        scene: &mut Scene,
        input: ImageHandle,
        params: &FrameParams,
    ) -> ImageHandle
    where
        D: GpuDevice + ?Sized,
        C: CompilationService + ?Sized,
    {
        if !scene.post_fx.iter().any(|effect| effect.enabled) {
            return input;
        }
        let (width, height) = (params.width, params.height);
        let scratch = match self
            .resources
            .scratch_pair(device, scene_index, ChainKind::PostFx, width, height)
        {
            Ok(scratch) => scratch,
            Err(err) => {
                tracing::warn!(scene = %scene.name, %err, "post-processing skipped");
                return input;
            }
        };

        let black = device.placeholder(TextureDimension::D2);
        let uniforms = params.uniforms();
        let mut current = input;
        let mut write = 0;

        for effect in scene
            .post_fx
            .iter_mut()
            .filter(|effect| effect.enabled)
            .take(self.max_chain)
        {
            let Some(pipeline) = build_post_fx(device, compiler, mode, effect) else {
                continue;
            };

            let ring = self.resources.history_mut(effect.id());
            match ring.ensure(device, self.history_depth, width, height) {
                Ok(true) => {
                    if let Err(err) = ring.seed(device, current) {
                        tracing::warn!(effect = %effect.name, %err, "history seed failed");
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(effect = %effect.name, %err, "history allocation failed");
                    continue;
                }
            }

            let mut channels = [black; CHANNEL_COUNT];
            channels[0] = current;
            for (age, channel) in channels[1..=self.history_depth].iter_mut().enumerate() {
                *channel = ring.most_recent(age).unwrap_or(current);
            }

            let target = scratch[write];
            let pass = FragmentPass {
                pipeline,
                target,
                channels,
                uniforms,
            };
            if let Err(err) = device.draw_fullscreen(&pass) {
                tracing::warn!(effect = %effect.name, %err, "post-processing pass failed");
                continue;
            }
            if let Err(err) = ring.push(device, target) {
                tracing::warn!(effect = %effect.name, %err, "history update failed");
            }

            current = target;
            write = 1 - write;
        }
        current
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_compute<D, C>(
        &mut self,
        device: &mut D,
        compiler: &mut C,
        mode: CompileMode,
        scene_index: usize,
        scene: &mut Scene,
        input: ImageHandle,
        params: &FrameParams,
    ) -> ImageHandle
    where
        D: GpuDevice + ?Sized,
        C: CompilationService + ?Sized,
    {
        if !scene.compute_effects.iter().any(|effect| effect.enabled) {
            return input;
        }
        let (width, height) = (params.width, params.height);
        let scratch = match self
            .resources
            .scratch_pair(device, scene_index, ChainKind::Compute, width, height)
        {
            Ok(scratch) => scratch,
            Err(err) => {
                tracing::warn!(scene = %scene.name, %err, "compute chain skipped");
                return input;
            }
        };

        let mut current = input;
        let mut write = 0;

        for effect in scene.compute_effects.iter_mut().filter(|effect| effect.enabled) {
            let Some(pipeline) = build_compute(device, compiler, mode, effect) else {
                continue;
            };

            let history_count = effect.history_count();
            let ring = self.resources.history_mut(effect.id());
            if let Err(err) = ring.ensure(device, history_count, width, height) {
                tracing::warn!(effect = %effect.name, %err, "history allocation failed");
                continue;
            }

            let mut history = [current; MAX_COMPUTE_HISTORY];
            for (age, slot) in history.iter_mut().take(history_count).enumerate() {
                *slot = ring.most_recent(age).unwrap_or(current);
            }

            let output = scratch[write];
            let dispatch = ComputeDispatch {
                pipeline,
                input: current,
                history,
                output,
                params: ComputeParams {
                    params: effect.params,
                    time: params.time_seconds as f32,
                    inv_width: 1.0 / width.max(1) as f32,
                    inv_height: 1.0 / height.max(1) as f32,
                    frame: params.frame_index as u32,
                },
                groups: dispatch_groups(width, height, effect.thread_group),
            };
            if let Err(err) = device.dispatch(&dispatch) {
                tracing::warn!(effect = %effect.name, %err, "compute dispatch failed");
                continue;
            }
            if let Err(err) = ring.push(device, output) {
                tracing::warn!(effect = %effect.name, %err, "history update failed");
            }

            current = output;
            write = 1 - write;
        }
        current
    }
}

/// Usable pipeline for this frame, rebuilding it first when needed.
fn build_post_fx<D, C>(
    device: &mut D,
    compiler: &mut C,
    mode: CompileMode,
    effect: &mut PostFxEffect,
) -> Option<PipelineHandle>
where
    D: GpuDevice + ?Sized,
    C: CompilationService + ?Sized,
{
    if effect.shader.needs_build() {
        effect.shader.state = CompileState::Compiling;
        let outcome = compile_pipeline(
            device,
            compiler,
            &effect.compile_request(mode),
            PipelineKind::Fragment,
        );
        if !commit_pipeline(device, &mut effect.shader, outcome, &effect.name) {
            return None;
        }
    }
    effect.shader.pipeline
}

fn build_compute<D, C>(
    device: &mut D,
    compiler: &mut C,
    mode: CompileMode,
    effect: &mut ComputeEffect,
) -> Option<PipelineHandle>
where
    D: GpuDevice + ?Sized,
    C: CompilationService + ?Sized,
{
    if effect.shader.needs_build() {
        effect.shader.state = CompileState::Compiling;
        let outcome = compile_pipeline(
            device,
            compiler,
            &effect.compile_request(mode),
            PipelineKind::Compute,
        );
        if !commit_pipeline(device, &mut effect.shader, outcome, &effect.name) {
            return None;
        }
    }
    effect.shader.pipeline
}
