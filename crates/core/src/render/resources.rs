use std::collections::{HashMap, HashSet};

use crate::{
    gpu::{GpuDevice, ImageDesc, ImageHandle, ImageUsage, TextureDimension},
    scene::EffectId,
    Result,
};

/// Which sub-chain a scratch pair serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    PostFx,
    Compute,
}

impl ChainKind {
    fn usage(self) -> ImageUsage {
        match self {
            ChainKind::PostFx => ImageUsage::RenderTarget,
            ChainKind::Compute => ImageUsage::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScratchPair {
    images: [ImageHandle; 2],
    width: u32,
    height: u32,
}

/// Circular buffer of an effect's previous outputs.
#[derive(Debug, Default)]
pub struct HistoryRing {
    images: Vec<ImageHandle>,
    index: usize,
    filled: usize,
    initialized: bool,
    width: u32,
    height: u32,
}

impl HistoryRing {
    pub fn depth(&self) -> usize {
        self.images.len()
    }

    pub fn write_index(&self) -> usize {
        self.index
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn slot(&self, slot: usize) -> Option<ImageHandle> {
        self.images.get(slot).copied()
    }

    /// Makes sure the ring holds `depth` images of the given size.
    ///
    /// Returns `true` when the ring was (re)allocated, which clears it.
    pub fn ensure<D>(&mut self, device: &mut D, depth: usize, width: u32, height: u32) -> Result<bool>
    where
        D: GpuDevice + ?Sized,
    {
        if self.images.len() == depth && self.width == width && self.height == height {
            return Ok(false);
        }

        self.release(device);
        for _ in 0..depth {
            let image = device.create_image(ImageDesc {
                width,
                height,
                dimension: TextureDimension::D2,
                usage: ImageUsage::Sampled,
            })?;
            self.images.push(image);
        }
        self.width = width;
        self.height = height;
        tracing::debug!(depth, width, height, "allocated history ring");
        Ok(true)
    }

    /// Copies `input` into every slot.
    pub fn seed<D>(&mut self, device: &mut D, input: ImageHandle) -> Result<()>
    where
        D: GpuDevice + ?Sized,
    {
        for image in &self.images {
            device.copy_image(input, *image)?;
        }
        self.initialized = true;
        self.filled = self.images.len();
        Ok(())
    }

    /// Stores `output` in the slot after the current one and makes it current.
    pub fn push<D>(&mut self, device: &mut D, output: ImageHandle) -> Result<()>
    where
        D: GpuDevice + ?Sized,
    {
        if self.images.is_empty() {
            return Ok(());
        }
        let next = (self.index + 1) % self.images.len();
        device.copy_image(output, self.images[next])?;
        self.index = next;
        self.filled = (self.filled + 1).min(self.images.len());
        self.initialized = true;
        Ok(())
    }

    /// `age == 0` is the most recent entry. Slots never written return `None`.
    pub fn most_recent(&self, age: usize) -> Option<ImageHandle> {
        let depth = self.images.len();
        if age >= self.filled || depth == 0 {
            return None;
        }
        Some(self.images[(self.index + depth - age % depth) % depth])
    }

    pub fn release<D>(&mut self, device: &mut D)
    where
        D: GpuDevice + ?Sized,
    {
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
        self.index = 0;
        self.filled = 0;
        self.initialized = false;
    }
}

/// GPU state that outlives a frame, keyed by stable identities instead of
/// effect addresses.
#[derive(Debug, Default)]
pub struct ResourceTable {
    scratch: HashMap<(usize, ChainKind), ScratchPair>,
    history: HashMap<EffectId, HistoryRing>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ping-pong images for `scene`'s `kind` chain, recreated on resize.
    pub fn scratch_pair<D>(
        &mut self,
        device: &mut D,
        scene: usize,
        kind: ChainKind,
        width: u32,
        height: u32,
    ) -> Result<[ImageHandle; 2]>
    where
        D: GpuDevice + ?Sized,
    {
        if let Some(pair) = self.scratch.get(&(scene, kind)) {
            if pair.width == width && pair.height == height {
                return Ok(pair.images);
            }
        }
        if let Some(stale) = self.scratch.remove(&(scene, kind)) {
            for image in stale.images {
                device.destroy_image(image);
            }
        }

        let desc = ImageDesc {
            width,
            height,
            dimension: TextureDimension::D2,
            usage: kind.usage(),
        };
        let first = device.create_image(desc)?;
        let second = match device.create_image(desc) {
            Ok(image) => image,
            Err(err) => {
                device.destroy_image(first);
                return Err(err);
            }
        };
        let images = [first, second];
        self.scratch.insert(
            (scene, kind),
            ScratchPair {
                images,
                width,
                height,
            },
        );
        tracing::debug!(scene, ?kind, width, height, "allocated scratch pair");
        Ok(images)
    }

    pub fn history(&self, effect: EffectId) -> Option<&HistoryRing> {
        self.history.get(&effect)
    }

    pub fn history_mut(&mut self, effect: EffectId) -> &mut HistoryRing {
        self.history.entry(effect).or_default()
    }

    /// Drops the rings of effects that no longer exist.
    pub fn retain_effects<D>(&mut self, device: &mut D, live: &HashSet<EffectId>)
    where
        D: GpuDevice + ?Sized,
    {
        let stale: Vec<EffectId> = self
            .history
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(mut ring) = self.history.remove(&id) {
                ring.release(device);
            }
        }
    }

    /// Drops scratch pairs of scenes at or beyond `scene_count`.
    pub fn retain_scenes<D>(&mut self, device: &mut D, scene_count: usize)
    where
        D: GpuDevice + ?Sized,
    {
        self.scratch.retain(|(scene, _), pair| {
            let keep = *scene < scene_count;
            if !keep {
                for image in pair.images {
                    device.destroy_image(image);
                }
            }
            keep
        });
    }

    /// Forgets every handle without destroying it. Used after device loss.
    pub fn forget(&mut self) {
        self.scratch.clear();
        self.history.clear();
    }

    pub fn history_rings(&self) -> usize {
        self.history.len()
    }

    pub fn scratch_pairs(&self) -> usize {
        self.scratch.len()
    }
}
