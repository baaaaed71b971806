use std::collections::HashMap;

use super::RenderGraph;
use crate::{
    gpu::{
        FragmentPass, FrameUniforms, GpuDevice, ImageDesc, ImageHandle, PipelineKind,
        TextureDimension, CHANNEL_COUNT,
    },
    scene::ShaderSlot,
    shader::{CompilationService, CompileRequest, ShaderTarget},
};

/// Built-in two-input blend programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionPreset {
    Crossfade,
    DipToBlack,
    FadeOut,
    FadeIn,
    Glitch,
    Pixelate,
}

const BLEND_PRELUDE: &str = r#"
@group(0) @binding(0) var from_image: texture_2d<f32>;
@group(0) @binding(1) var to_image: texture_2d<f32>;
@group(0) @binding(8) var linear: sampler;

struct Frame { resolution: vec2<f32>, progress: f32 };
@group(1) @binding(0) var<uniform> frame: Frame;

fn sample_pair(uv: vec2<f32>) -> array<vec4<f32>, 2> {
    return array<vec4<f32>, 2>(
        textureSample(from_image, linear, uv),
        textureSample(to_image, linear, uv),
    );
}

@fragment
fn main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = position.xy / frame.resolution;
    let t = clamp(frame.progress, 0.0, 1.0);
    let black = vec4<f32>(0.0, 0.0, 0.0, 1.0);
"#;

const CROSSFADE: &str = r#"
    let pair = sample_pair(uv);
    return mix(pair[0], pair[1], t);
}
"#;

const DIP_TO_BLACK: &str = r#"
    let pair = sample_pair(uv);
    if (t < 0.5) {
        return mix(pair[0], black, t * 2.0);
    }
    return mix(black, pair[1], (t - 0.5) * 2.0);
}
"#;

const FADE_OUT: &str = r#"
    let pair = sample_pair(uv);
    return mix(pair[0], black, t);
}
"#;

const FADE_IN: &str = r#"
    let pair = sample_pair(uv);
    return mix(black, pair[1], t);
}
"#;

const GLITCH: &str = r#"
    let offset = frame.progress * 10.0;
    let row = floor(uv.y * 20.0) + offset;
    let noise = fract(sin(dot(vec2<f32>(row, offset), vec2<f32>(12.9898, 78.233))) * 43758.5453);
    let shift = (noise - 0.5) * 0.1 * sin(t * 3.14159);
    let pair = sample_pair(uv + vec2<f32>(shift, 0.0));
    return mix(pair[0], pair[1], t);
}
"#;

const PIXELATE: &str = r#"
    let cells = 50.0 * (1.0 - sin(t * 3.14159)) + 1.0;
    let pair = sample_pair(floor(uv * cells) / cells);
    return mix(pair[0], pair[1], t);
}
"#;

impl TransitionPreset {
    pub const ALL: [TransitionPreset; 6] = [
        TransitionPreset::Crossfade,
        TransitionPreset::DipToBlack,
        TransitionPreset::FadeOut,
        TransitionPreset::FadeIn,
        TransitionPreset::Glitch,
        TransitionPreset::Pixelate,
    ];

    /// Parses a row's preset stem. `fade-out` and `fade_out` are the same.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let normalized = stem.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|preset| preset.stem() == normalized)
    }

    pub fn stem(self) -> &'static str {
        match self {
            TransitionPreset::Crossfade => "crossfade",
            TransitionPreset::DipToBlack => "dip_to_black",
            TransitionPreset::FadeOut => "fade_out",
            TransitionPreset::FadeIn => "fade_in",
            TransitionPreset::Glitch => "glitch",
            TransitionPreset::Pixelate => "pixelate",
        }
    }

    pub fn shader_source(self) -> String {
        let body = match self {
            TransitionPreset::Crossfade => CROSSFADE,
            TransitionPreset::DipToBlack => DIP_TO_BLACK,
            TransitionPreset::FadeOut => FADE_OUT,
            TransitionPreset::FadeIn => FADE_IN,
            TransitionPreset::Glitch => GLITCH,
            TransitionPreset::Pixelate => PIXELATE,
        };
        format!("{BLEND_PRELUDE}{body}")
    }
}

/// Scene shown on screen together with the timing of its local clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActiveScene {
    /// `None` is black.
    pub index: Option<usize>,
    pub offset: f32,
    pub start_beat: f64,
}

impl ActiveScene {
    pub fn new(index: Option<usize>, offset: f32, start_beat: f64) -> Self {
        Self {
            index,
            offset,
            start_beat,
        }
    }
}

/// A transition in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionState {
    pub from: ActiveScene,
    pub to: ActiveScene,
    pub start_beat: f64,
    pub duration_beats: f64,
    pub preset: TransitionPreset,
}

impl TransitionState {
    /// `(exact_beat - start) / duration`, clamped to `[0, 1]`.
    pub fn progress(&self, exact_beat: f64) -> f32 {
        if self.duration_beats <= 0.0 {
            return 1.0;
        }
        ((exact_beat - self.start_beat) / self.duration_beats).clamp(0.0, 1.0) as f32
    }

    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }
}

/// Idle or blending two scene images with a preset shader.
#[derive(Debug, Default)]
pub struct TransitionCompositor {
    state: Option<TransitionState>,
    pipelines: HashMap<TransitionPreset, ShaderSlot>,
    held: Option<ImageHandle>,
    target: Option<ImageHandle>,
    generation: u64,
}

impl TransitionCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &mut self,
        from: ActiveScene,
        to: ActiveScene,
        start_beat: f64,
        duration_beats: f64,
        preset: TransitionPreset,
    ) {
        tracing::info!(
            preset = preset.stem(),
            from = ?from.index,
            to = ?to.index,
            start_beat,
            duration_beats,
            "transition started"
        );
        self.state = Some(TransitionState {
            from,
            to,
            start_beat,
            duration_beats,
            preset,
        });
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&TransitionState> {
        self.state.as_ref()
    }

    /// Scene the active transition lands on.
    pub fn pending_target(&self) -> Option<ActiveScene> {
        self.state.map(|state| state.to)
    }

    pub fn progress(&self, exact_beat: f64) -> Option<f32> {
        self.state.map(|state| state.progress(exact_beat))
    }

    /// Finishes a transition whose progress reached 1 while playing and
    /// returns the scene it landed on.
    pub fn take_completed(&mut self, exact_beat: f64, playing: bool) -> Option<ActiveScene> {
        let state = self.state?;
        if !playing || state.progress(exact_beat) < 1.0 {
            return None;
        }
        self.state = None;
        tracing::info!(to = ?state.to.index, "transition completed");
        Some(state.to)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Copies `image` into an image owned by the compositor so that
    /// rendering the destination scene cannot overwrite it.
    pub fn hold<D, C>(
        &mut self,
        graph: &mut RenderGraph<D, C>,
        image: Option<ImageHandle>,
        width: u32,
        height: u32,
    ) -> Option<ImageHandle>
    where
        D: GpuDevice,
        C: CompilationService,
    {
        let image = image?;
        self.sync_generation(graph);
        let held = Self::ensure_image(graph.device_mut(), &mut self.held, width, height)?;
        match graph.device_mut().copy_image(image, held) {
            Ok(()) => Some(held),
            Err(err) => {
                tracing::warn!(%err, "could not hold transition source");
                Some(image)
            }
        }
    }

    /// Blends `from` into `to` at `progress`. Missing inputs are black.
    pub fn compose<D, C>(
        &mut self,
        graph: &mut RenderGraph<D, C>,
        from: Option<ImageHandle>,
        to: Option<ImageHandle>,
        progress: f32,
        width: u32,
        height: u32,
    ) -> Option<ImageHandle>
    where
        D: GpuDevice,
        C: CompilationService,
    {
        let preset = self.state?.preset;
        self.sync_generation(graph);

        let slot = self.pipelines.entry(preset).or_default();
        if slot.needs_build() {
            let source = preset.shader_source();
            let request = CompileRequest {
                label: preset.stem(),
                source: &source,
                entry_point: "main",
                target: ShaderTarget::Fragment,
                mode: graph.compile_mode(),
            };
            graph.build_into(slot, &request, PipelineKind::Fragment);
        }
        let Some(pipeline) = slot.pipeline else {
            return if progress < 0.5 { from } else { to };
        };

        let target = Self::ensure_image(graph.device_mut(), &mut self.target, width, height)?;
        let device = graph.device_mut();
        let black = device.placeholder(TextureDimension::D2);
        let mut channels = [black; CHANNEL_COUNT];
        channels[0] = from.unwrap_or(black);
        channels[1] = to.unwrap_or(black);

        let pass = FragmentPass {
            pipeline,
            target,
            channels,
            uniforms: FrameUniforms {
                resolution: [width as f32, height as f32],
                time: progress,
                ..FrameUniforms::default()
            },
        };
        match device.draw_fullscreen(&pass) {
            Ok(()) => Some(target),
            Err(err) => {
                tracing::warn!(preset = preset.stem(), %err, "transition blend failed");
                to.or(from)
            }
        }
    }

    fn sync_generation<D, C>(&mut self, graph: &RenderGraph<D, C>)
    where
        D: GpuDevice,
        C: CompilationService,
    {
        if self.generation != graph.generation() {
            self.generation = graph.generation();
            self.pipelines.clear();
            self.held = None;
            self.target = None;
        }
    }

    fn ensure_image<D: GpuDevice>(
        device: &mut D,
        image: &mut Option<ImageHandle>,
        width: u32,
        height: u32,
    ) -> Option<ImageHandle> {
        if let Some(existing) = *image {
            if device
                .image_desc(existing)
                .is_some_and(|desc| desc.matches_size(width, height))
            {
                return Some(existing);
            }
            device.destroy_image(existing);
            *image = None;
        }
        match device.create_image(ImageDesc::render_target(width, height, TextureDimension::D2)) {
            Ok(created) => {
                *image = Some(created);
                Some(created)
            }
            Err(err) => {
                tracing::warn!(%err, "could not allocate transition image");
                None
            }
        }
    }
}
