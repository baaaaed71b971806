use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::{
    ComputeDispatch, FragmentPass, GpuDevice, ImageDesc, ImageHandle, ImageUsage, PipelineHandle,
    PipelineKind, TextureDimension,
};
use crate::{shader::CompiledShader, BeatlineError, Result};

/// Content value of a black image.
pub const BLACK: u64 = 0;

const UNINITIALISED: u64 = 0xdead_beef_0000_0000;

#[derive(Debug, Clone)]
struct ImageSlot {
    desc: ImageDesc,
    content: u64,
}

#[derive(Debug, Clone)]
struct PipelineSlot {
    kind: PipelineKind,
    fingerprint: u64,
}

/// Counters describing the work submitted to a [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub images_created: usize,
    pub pipelines_created: usize,
    pub draws: usize,
    pub dispatches: usize,
    pub copies: usize,
    pub last_groups: [u32; 3],
}

/// Deterministic device without a GPU behind it.
///
/// Each image carries a 64-bit content fingerprint instead of pixels. Draws
/// and dispatches hash their pipeline, inputs and uniforms into the target,
/// so identical work produces identical content and a copy reproduces its
/// source exactly.
#[derive(Debug)]
pub struct HeadlessDevice {
    generation: u64,
    next_id: u64,
    images: HashMap<ImageHandle, ImageSlot>,
    pipelines: HashMap<PipelineHandle, PipelineSlot>,
    placeholders: HashMap<TextureDimension, ImageHandle>,
    stats: DeviceStats,
    last_dispatch: Option<ComputeDispatch>,
    last_pass: Option<FragmentPass>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            generation: 1,
            next_id: 1,
            images: HashMap::new(),
            pipelines: HashMap::new(),
            placeholders: HashMap::new(),
            stats: DeviceStats::default(),
            last_dispatch: None,
            last_pass: None,
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn last_dispatch(&self) -> Option<&ComputeDispatch> {
        self.last_dispatch.as_ref()
    }

    pub fn last_pass(&self) -> Option<&FragmentPass> {
        self.last_pass.as_ref()
    }

    /// Content fingerprint of a live image.
    pub fn content(&self, image: ImageHandle) -> Option<u64> {
        self.images.get(&image).map(|slot| slot.content)
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Simulates a lost device: every image and pipeline is dropped.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.images.clear();
        self.pipelines.clear();
        self.placeholders.clear();
        tracing::info!(generation = self.generation, "headless device reset");
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn read(&self, image: ImageHandle) -> Result<u64> {
        self.content(image)
            .ok_or_else(|| BeatlineError::gpu(format!("image {} is not alive", image.id())))
    }

    fn pipeline(&self, pipeline: PipelineHandle, kind: PipelineKind) -> Result<u64> {
        match self.pipelines.get(&pipeline) {
            Some(slot) if slot.kind == kind => Ok(slot.fingerprint),
            Some(slot) => Err(BeatlineError::gpu(format!(
                "pipeline {} is {:?}, expected {kind:?}",
                pipeline.id(),
                slot.kind
            ))),
            None => Err(BeatlineError::gpu(format!(
                "pipeline {} is not alive",
                pipeline.id()
            ))),
        }
    }

    fn write(&mut self, image: ImageHandle, content: u64) -> Result<()> {
        let slot = self
            .images
            .get_mut(&image)
            .ok_or_else(|| BeatlineError::gpu(format!("image {} is not alive", image.id())))?;
        slot.content = content;
        Ok(())
    }
}

impl GpuDevice for HeadlessDevice {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn create_image(&mut self, desc: ImageDesc) -> Result<ImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BeatlineError::gpu("zero-sized image"));
        }
        let id = self.allocate_id();
        let handle = ImageHandle(id);
        self.images.insert(
            handle,
            ImageSlot {
                desc,
                content: UNINITIALISED | id,
            },
        );
        self.stats.images_created += 1;
        Ok(handle)
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.remove(&image);
    }

    fn image_desc(&self, image: ImageHandle) -> Option<ImageDesc> {
        self.images.get(&image).map(|slot| slot.desc)
    }

    fn placeholder(&mut self, dimension: TextureDimension) -> ImageHandle {
        if let Some(handle) = self.placeholders.get(&dimension) {
            return *handle;
        }
        let handle = ImageHandle(self.allocate_id());
        self.images.insert(
            handle,
            ImageSlot {
                desc: ImageDesc {
                    width: 1,
                    height: 1,
                    dimension,
                    usage: ImageUsage::Sampled,
                },
                content: BLACK,
            },
        );
        self.placeholders.insert(dimension, handle);
        handle
    }

    fn create_pipeline(
        &mut self,
        kind: PipelineKind,
        shader: &CompiledShader,
    ) -> Result<PipelineHandle> {
        if shader.bytecode.is_empty() {
            return Err(BeatlineError::gpu("pipeline without bytecode"));
        }
        let mut hasher = DefaultHasher::new();
        kind.hash(&mut hasher);
        shader.bytecode.hash(&mut hasher);
        let handle = PipelineHandle(self.allocate_id());
        self.pipelines.insert(
            handle,
            PipelineSlot {
                kind,
                fingerprint: hasher.finish(),
            },
        );
        self.stats.pipelines_created += 1;
        Ok(handle)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline);
    }

    fn draw_fullscreen(&mut self, pass: &FragmentPass) -> Result<()> {
        let mut hasher = DefaultHasher::new();
        self.pipeline(pass.pipeline, PipelineKind::Fragment)?
            .hash(&mut hasher);
        for channel in pass.channels {
            self.read(channel)?.hash(&mut hasher);
        }
        pass.uniforms.time.to_bits().hash(&mut hasher);
        pass.uniforms.resolution[0].to_bits().hash(&mut hasher);
        pass.uniforms.resolution[1].to_bits().hash(&mut hasher);

        self.write(pass.target, hasher.finish())?;
        self.stats.draws += 1;
        self.last_pass = Some(*pass);
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch) -> Result<()> {
        let mut hasher = DefaultHasher::new();
        self.pipeline(dispatch.pipeline, PipelineKind::Compute)?
            .hash(&mut hasher);
        self.read(dispatch.input)?.hash(&mut hasher);
        for image in dispatch.history {
            self.read(image)?.hash(&mut hasher);
        }
        for param in dispatch.params.params {
            param.to_bits().hash(&mut hasher);
        }
        dispatch.params.time.to_bits().hash(&mut hasher);
        dispatch.params.frame.hash(&mut hasher);

        self.write(dispatch.output, hasher.finish())?;
        self.stats.dispatches += 1;
        self.stats.last_groups = dispatch.groups;
        self.last_dispatch = Some(*dispatch);
        Ok(())
    }

    fn copy_image(&mut self, source: ImageHandle, destination: ImageHandle) -> Result<()> {
        let content = self.read(source)?;
        self.write(destination, content)?;
        self.stats.copies += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{FrameUniforms, CHANNEL_COUNT};
    use crate::shader::ShaderTarget;

    fn shader(text: &str) -> CompiledShader {
        CompiledShader {
            target: ShaderTarget::Fragment,
            bytecode: text.as_bytes().to_vec(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn placeholders_are_black_and_cached() {
        let mut device = HeadlessDevice::new();
        let cube = device.placeholder(TextureDimension::Cube);
        assert_eq!(device.placeholder(TextureDimension::Cube), cube);
        assert_ne!(device.placeholder(TextureDimension::D2), cube);
        assert_eq!(device.content(cube), Some(BLACK));
        assert_eq!(device.image_desc(cube).unwrap().dimension, TextureDimension::Cube);
    }

    #[test]
    fn identical_draws_produce_identical_content() {
        let mut device = HeadlessDevice::new();
        let pipeline = device
            .create_pipeline(PipelineKind::Fragment, &shader("fn main() {}"))
            .unwrap();
        let black = device.placeholder(TextureDimension::D2);
        let a = device.create_image(ImageDesc::render_target(4, 4, TextureDimension::D2)).unwrap();
        let b = device.create_image(ImageDesc::render_target(4, 4, TextureDimension::D2)).unwrap();
        assert_ne!(device.content(a), device.content(b));

        let mut pass = FragmentPass {
            pipeline,
            target: a,
            channels: [black; CHANNEL_COUNT],
            uniforms: FrameUniforms::default(),
        };
        device.draw_fullscreen(&pass).unwrap();
        pass.target = b;
        device.draw_fullscreen(&pass).unwrap();
        assert_eq!(device.content(a), device.content(b));

        pass.uniforms.time = 1.0;
        device.draw_fullscreen(&pass).unwrap();
        assert_ne!(device.content(a), device.content(b));
        assert_eq!(device.stats().draws, 3);
    }

    #[test]
    fn pipeline_kind_is_checked() {
        let mut device = HeadlessDevice::new();
        let pipeline = device
            .create_pipeline(PipelineKind::Compute, &shader("fn main() {}"))
            .unwrap();
        let black = device.placeholder(TextureDimension::D2);
        let target = device.create_image(ImageDesc::storage(2, 2)).unwrap();
        let pass = FragmentPass {
            pipeline,
            target,
            channels: [black; CHANNEL_COUNT],
            uniforms: FrameUniforms::default(),
        };
        assert!(device.draw_fullscreen(&pass).is_err());
    }

    #[test]
    fn reset_invalidates_everything() {
        let mut device = HeadlessDevice::new();
        let image = device.create_image(ImageDesc::storage(2, 2)).unwrap();
        let generation = device.generation();
        device.reset();
        assert!(device.generation() > generation);
        assert!(device.image_desc(image).is_none());
        assert_eq!(device.live_images(), 0);
    }
}
