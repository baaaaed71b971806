use std::collections::HashMap;
use std::path::Path;

use crate::{
    gpu::{GpuDevice, ImageDesc, ImageHandle, ImageUsage, TextureDimension},
    scene::{BindingKind, Scene},
    BeatlineError, Result,
};

/// Image imported from disk and uploaded by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedTexture {
    pub image: ImageHandle,
    pub dimension: TextureDimension,
}

/// Registry for all file textures referenced by scene bindings.
#[derive(Debug, Default)]
pub struct AssetStore {
    textures: HashMap<String, ImportedTexture>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
        }
    }

    /// Registers an already decoded image under `path`, returning the image
    /// it replaces.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        image: ImageHandle,
        dimension: TextureDimension,
    ) -> Option<ImageHandle> {
        self.textures
            .insert(path.into(), ImportedTexture { image, dimension })
            .map(|previous| previous.image)
    }

    /// Allocates a stand-in image under `key` for a file that exists on disk.
    ///
    /// Decoding is the host's job. Headless hosts use this so that a binding
    /// to a present file resolves to a real image instead of a placeholder.
    pub fn import_stand_in<D>(
        &mut self,
        device: &mut D,
        key: &str,
        file: &Path,
        dimension: TextureDimension,
    ) -> Result<ImageHandle>
    where
        D: GpuDevice + ?Sized,
    {
        if !file.is_file() {
            return Err(BeatlineError::msg(format!(
                "texture `{}` does not exist",
                file.display()
            )));
        }
        let image = device.create_image(ImageDesc {
            width: 1,
            height: 1,
            dimension,
            usage: ImageUsage::Sampled,
        })?;
        if let Some(previous) = self.register(key, image, dimension) {
            device.destroy_image(previous);
        }
        Ok(image)
    }

    /// Image for `path` if it was imported with the requested dimensionality.
    pub fn resolve(&self, path: &str, dimension: TextureDimension) -> Option<ImageHandle> {
        self.textures
            .get(path)
            .filter(|texture| texture.dimension == dimension)
            .map(|texture| texture.image)
    }

    /// Forgets every registered image. Used after device loss.
    pub fn clear(&mut self) {
        self.textures.clear();
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Checks that every enabled file binding of `scene` has an image.
    pub fn resolve_scene_assets(&self, scene: &Scene) -> Result<()> {
        for binding in &scene.bindings {
            if !binding.enabled || binding.kind != BindingKind::File {
                continue;
            }
            if !self.textures.contains_key(&binding.file_path) {
                return Err(BeatlineError::msg(format!(
                    "unknown texture `{}` referenced by scene `{}`",
                    binding.file_path, scene.name
                )));
            }
        }
        Ok(())
    }
}
