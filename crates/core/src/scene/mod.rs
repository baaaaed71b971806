//! Scenes, texture bindings and the effect chains attached to them.

mod effects;

pub use effects::{ComputeEffect, ComputeEffectKind, EffectId, PostFxEffect};

use serde::{Deserialize, Serialize};

use crate::{
    gpu::{ImageHandle, PipelineHandle, TextureDimension, CHANNEL_COUNT},
    project::optional_index,
    shader::{CompileMode, CompileRequest, CompileState, ShaderTarget},
};

/// Entry point of scene and post-processing fragment programs.
pub const FRAGMENT_ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    /// Output image of another scene.
    #[default]
    Scene,
    /// Image imported from disk through the asset store.
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureBinding {
    pub channel: u8,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(rename = "bindType", default)]
    pub kind: BindingKind,
    #[serde(rename = "sourceIndex", with = "optional_index", default)]
    pub source_scene: Option<usize>,
    #[serde(rename = "path", default)]
    pub file_path: String,
    /// Dimensionality the shader declares for this channel.
    #[serde(rename = "type", default)]
    pub dimension: TextureDimension,
}

fn enabled_by_default() -> bool {
    true
}

impl TextureBinding {
    pub fn scene(channel: u8, source_scene: usize) -> Self {
        Self {
            channel,
            enabled: true,
            kind: BindingKind::Scene,
            source_scene: Some(source_scene),
            file_path: String::new(),
            dimension: TextureDimension::D2,
        }
    }

    pub fn file(channel: u8, path: impl Into<String>) -> Self {
        Self {
            channel,
            enabled: true,
            kind: BindingKind::File,
            source_scene: None,
            file_path: path.into(),
            dimension: TextureDimension::D2,
        }
    }

    pub fn with_dimension(mut self, dimension: TextureDimension) -> Self {
        self.dimension = dimension;
        self
    }
}

/// Pipeline bookkeeping for anything that compiles a shader.
#[derive(Debug, Default)]
pub struct ShaderSlot {
    pub state: CompileState,
    pub pipeline: Option<PipelineHandle>,
    pub compiled_bytes: usize,
}

impl ShaderSlot {
    /// Dirty units, and clean ones that lost their pipeline, are (re)built.
    /// Units in error wait for their source to change.
    pub fn needs_build(&self) -> bool {
        self.state.needs_compile()
            || (self.pipeline.is_none() && matches!(self.state, CompileState::Clean))
    }

    pub fn mark_dirty(&mut self) {
        self.state.mark_dirty();
    }

    /// Forgets a pipeline that belonged to a lost device.
    pub fn invalidate(&mut self) {
        self.pipeline = None;
        self.compiled_bytes = 0;
        self.state.mark_dirty();
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(rename = "code")]
    source: String,
    #[serde(default)]
    pub bindings: Vec<TextureBinding>,
    #[serde(rename = "outputType", default)]
    pub output_dimension: TextureDimension,
    #[serde(rename = "postfx", default)]
    pub post_fx: Vec<PostFxEffect>,
    #[serde(rename = "compute", default)]
    pub compute_effects: Vec<ComputeEffect>,
    #[serde(skip)]
    pub(crate) shader: ShaderSlot,
    #[serde(skip)]
    pub(crate) output: Option<ImageHandle>,
}

impl Scene {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            bindings: Vec::new(),
            output_dimension: TextureDimension::D2,
            post_fx: Vec::new(),
            compute_effects: Vec::new(),
            shader: ShaderSlot::default(),
            output: None,
        }
    }

    pub fn with_binding(mut self, binding: TextureBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_post_fx(mut self, effect: PostFxEffect) -> Self {
        self.post_fx.push(effect);
        self
    }

    pub fn with_compute(mut self, effect: ComputeEffect) -> Self {
        self.compute_effects.push(effect);
        self
    }

    pub fn with_output_dimension(mut self, dimension: TextureDimension) -> Self {
        self.output_dimension = dimension;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Replaces the fragment program. The scene recompiles on its next render.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.shader.mark_dirty();
    }

    pub fn compile_state(&self) -> &CompileState {
        &self.shader.state
    }

    pub fn compiled_bytes(&self) -> usize {
        self.shader.compiled_bytes
    }

    pub fn has_pipeline(&self) -> bool {
        self.shader.pipeline.is_some()
    }

    /// Last successfully rendered image, if any.
    pub fn output(&self) -> Option<ImageHandle> {
        self.output
    }

    pub(crate) fn compile_request(&self, mode: CompileMode) -> CompileRequest<'_> {
        CompileRequest {
            label: &self.name,
            source: &self.source,
            entry_point: FRAGMENT_ENTRY_POINT,
            target: ShaderTarget::Fragment,
            mode,
        }
    }

    /// First enabled binding on `channel`.
    pub fn binding_for_channel(&self, channel: usize) -> Option<&TextureBinding> {
        self.bindings
            .iter()
            .find(|binding| binding.enabled && usize::from(binding.channel) == channel)
    }

    /// Dimensionality the shader expects on `channel`, 2D when undeclared.
    pub fn declared_dimension(&self, channel: usize) -> TextureDimension {
        self.bindings
            .iter()
            .find(|binding| usize::from(binding.channel) == channel)
            .map(|binding| binding.dimension)
            .unwrap_or_default()
    }

    /// Other scenes whose output this scene samples, in binding order.
    pub fn scene_dependencies(&self, own_index: usize) -> Vec<usize> {
        let mut dependencies = Vec::new();
        for binding in &self.bindings {
            if !binding.enabled || binding.kind != BindingKind::Scene {
                continue;
            }
            if usize::from(binding.channel) >= CHANNEL_COUNT {
                continue;
            }
            if let Some(source) = binding.source_scene {
                if source != own_index && !dependencies.contains(&source) {
                    dependencies.push(source);
                }
            }
        }
        dependencies
    }

    /// Every effect identity attached to this scene.
    pub fn effect_ids(&self) -> impl Iterator<Item = EffectId> + '_ {
        self.post_fx
            .iter()
            .map(PostFxEffect::id)
            .chain(self.compute_effects.iter().map(ComputeEffect::id))
    }

    /// Marks the scene and every effect for recompilation.
    pub fn invalidate_pipelines(&mut self) {
        self.shader.invalidate();
        self.output = None;
        for effect in &mut self.post_fx {
            effect.shader.invalidate();
        }
        for effect in &mut self.compute_effects {
            effect.shader.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_skip_self_files_and_disabled_bindings() {
        let mut disabled = TextureBinding::scene(3, 4);
        disabled.enabled = false;
        let scene = Scene::new("mix", "fn main() {}")
            .with_binding(TextureBinding::scene(0, 1))
            .with_binding(TextureBinding::scene(1, 2))
            .with_binding(TextureBinding::scene(2, 1))
            .with_binding(TextureBinding::scene(4, 0))
            .with_binding(TextureBinding::file(5, "noise.png"))
            .with_binding(disabled);

        assert_eq!(scene.scene_dependencies(0), vec![1, 2]);
    }

    #[test]
    fn channel_lookup_prefers_enabled_bindings() {
        let mut off = TextureBinding::scene(2, 0).with_dimension(TextureDimension::Cube);
        off.enabled = false;
        let scene = Scene::new("sky", "fn main() {}").with_binding(off);

        assert!(scene.binding_for_channel(2).is_none());
        assert_eq!(scene.declared_dimension(2), TextureDimension::Cube);
        assert_eq!(scene.declared_dimension(5), TextureDimension::D2);
    }

    #[test]
    fn editing_source_marks_scene_dirty() {
        let mut scene = Scene::new("a", "fn main() {}");
        scene.shader.state = CompileState::Error(Vec::new());
        assert!(!scene.shader.needs_build());

        scene.set_source("fn main() { }");
        assert!(scene.shader.needs_build());
        assert_eq!(scene.compile_state(), &CompileState::Dirty);
    }

    #[test]
    fn scene_documents_round_trip_field_names() {
        let scene: Scene = serde_json::from_str(
            r#"{
                "name": "tunnel",
                "code": "fn main() {}",
                "outputType": "TextureCube",
                "bindings": [
                    { "channel": 0, "bindType": "Scene", "sourceIndex": 2, "type": "Texture2D" },
                    { "channel": 1, "enabled": false, "bindType": "File", "sourceIndex": -1, "path": "a.png" }
                ],
                "postfx": [ { "name": "bloom", "code": "fn main() {}" } ],
                "compute": [ { "name": "trail", "code": "fn main() {}", "type": "Temporal", "historyCount": 3 } ]
            }"#,
        )
        .unwrap();

        assert_eq!(scene.output_dimension, TextureDimension::Cube);
        assert_eq!(scene.bindings[0].source_scene, Some(2));
        assert_eq!(scene.bindings[1].kind, BindingKind::File);
        assert!(!scene.bindings[1].enabled);
        assert!(scene.post_fx[0].enabled);
        assert_eq!(scene.compute_effects[0].history_count(), 3);
        assert_ne!(scene.post_fx[0].id(), scene.compute_effects[0].id());

        let text = serde_json::to_string(&scene).unwrap();
        assert!(text.contains("\"sourceIndex\":-1"));
    }
}
