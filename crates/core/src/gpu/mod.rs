//! GPU device seam.
//!
//! The render graph, effect processor and transition compositor only talk to
//! the device through [`GpuDevice`]. Images and pipelines are opaque handles
//! owned by whoever created them; the device owns the memory behind them.

pub mod headless;

pub use headless::HeadlessDevice;

use serde::{Deserialize, Serialize};

use crate::{
    beat::{BeatClock, Subdivision},
    shader::CompiledShader,
    Result,
};

/// Number of texture channels a fragment pass can sample.
pub const CHANNEL_COUNT: usize = 8;
/// Upper bound on the history ring of a compute effect.
pub const MAX_COMPUTE_HISTORY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(u64);

impl ImageHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u64);

impl PipelineHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Dimensionality of an image as declared by a binding or produced by a scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureDimension {
    #[default]
    #[serde(rename = "Texture2D")]
    D2,
    #[serde(rename = "TextureCube")]
    Cube,
    #[serde(rename = "Texture3D")]
    D3,
}

impl TextureDimension {
    /// Array layers (cube faces) or depth slices backing an image of this kind.
    pub fn layers(self) -> u32 {
        match self {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
            TextureDimension::D3 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsage {
    RenderTarget,
    /// Read/write image written by compute dispatches.
    Storage,
    Sampled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub usage: ImageUsage,
}

impl ImageDesc {
    pub fn render_target(width: u32, height: u32, dimension: TextureDimension) -> Self {
        Self {
            width,
            height,
            dimension,
            usage: ImageUsage::RenderTarget,
        }
    }

    pub fn storage(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            dimension: TextureDimension::D2,
            usage: ImageUsage::Storage,
        }
    }

    pub fn matches_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Fragment,
    /// Input on slot 0, history on 1..=8, output image on 9, parameters on 10.
    Compute,
}

/// Per-frame uniforms handed to every fragment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub beat: u32,
    pub bar: u32,
    pub beat_phase: f32,
    pub bar_phase: f32,
    pub sixteenth_phase: f32,
}

impl FrameUniforms {
    pub fn from_clock(clock: &BeatClock, width: u32, height: u32) -> Self {
        Self {
            resolution: [width as f32, height as f32],
            time: clock.audio_time() as f32,
            beat: clock.count(Subdivision::Quarter) as u32,
            bar: clock.count(Subdivision::Bar) as u32,
            beat_phase: clock.phase(Subdivision::Quarter),
            bar_phase: clock.bar_progress(),
            sixteenth_phase: clock.phase(Subdivision::Sixteenth),
        }
    }
}

/// Uniform block bound on the parameter slot of a compute dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComputeParams {
    pub params: [f32; 4],
    pub time: f32,
    pub inv_width: f32,
    pub inv_height: f32,
    pub frame: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FragmentPass {
    pub pipeline: PipelineHandle,
    pub target: ImageHandle,
    pub channels: [ImageHandle; CHANNEL_COUNT],
    pub uniforms: FrameUniforms,
}

#[derive(Debug, Clone, Copy)]
pub struct ComputeDispatch {
    pub pipeline: PipelineHandle,
    pub input: ImageHandle,
    pub history: [ImageHandle; MAX_COMPUTE_HISTORY],
    pub output: ImageHandle,
    pub params: ComputeParams,
    pub groups: [u32; 3],
}

pub trait GpuDevice {
    /// Changes whenever the underlying device is lost or replaced. Every
    /// handle created under an older generation is invalid.
    fn generation(&self) -> u64;

    fn create_image(&mut self, desc: ImageDesc) -> Result<ImageHandle>;
    fn destroy_image(&mut self, image: ImageHandle);
    fn image_desc(&self, image: ImageHandle) -> Option<ImageDesc>;

    /// Opaque black image of the requested dimensionality.
    fn placeholder(&mut self, dimension: TextureDimension) -> ImageHandle;

    fn create_pipeline(&mut self, kind: PipelineKind, shader: &CompiledShader)
        -> Result<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    fn draw_fullscreen(&mut self, pass: &FragmentPass) -> Result<()>;
    fn dispatch(&mut self, dispatch: &ComputeDispatch) -> Result<()>;
    fn copy_image(&mut self, source: ImageHandle, destination: ImageHandle) -> Result<()>;
}

/// Thread groups needed to cover a `width` x `height` image. At least one
/// group is dispatched on every axis.
pub fn dispatch_groups(width: u32, height: u32, thread_group: [u32; 3]) -> [u32; 3] {
    let cover = |extent: u32, size: u32| extent.div_ceil(size.max(1)).max(1);
    [
        cover(width, thread_group[0]),
        cover(height, thread_group[1]),
        cover(1, thread_group[2]),
    ]
}
