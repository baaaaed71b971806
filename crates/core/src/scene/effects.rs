use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::{ShaderSlot, FRAGMENT_ENTRY_POINT};
use crate::{
    gpu::MAX_COMPUTE_HISTORY,
    shader::{CompileMode, CompileRequest, CompileState, ShaderTarget},
};

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of an effect for the lifetime of the process.
///
/// GPU resources that outlive a frame are keyed by this id, so reordering
/// or removing effects never leaves a resource pointing at the wrong one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    pub fn next() -> Self {
        Self(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Rasterised post-processing pass.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostFxEffect {
    #[serde(skip, default = "EffectId::next")]
    id: EffectId,
    pub name: String,
    #[serde(rename = "code")]
    source: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(skip)]
    pub(crate) shader: ShaderSlot,
}

fn enabled_by_default() -> bool {
    true
}

impl PostFxEffect {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: EffectId::next(),
            name: name.into(),
            source: source.into(),
            enabled: true,
            shader: ShaderSlot::default(),
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

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

    /// Copy with a fresh identity and no GPU state.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.name.clone(), self.source.clone());
        copy.enabled = self.enabled;
        copy
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
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeEffectKind {
    Temporal,
    Denoising,
    #[default]
    PostProcess,
    Custom,
}

/// Compute-dispatched effect with its own temporal history.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEffect {
    #[serde(skip, default = "EffectId::next")]
    id: EffectId,
    pub name: String,
    #[serde(rename = "code")]
    source: String,
    #[serde(default = "default_entry_point")]
    entry_point: String,
    #[serde(rename = "type", default)]
    pub kind: ComputeEffectKind,
    #[serde(default)]
    pub params: [f32; 4],
    #[serde(default = "default_thread_group")]
    pub thread_group: [u32; 3],
    #[serde(default, deserialize_with = "clamped_history_count")]
    history_count: usize,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(skip)]
    pub(crate) shader: ShaderSlot,
}

fn default_entry_point() -> String {
    "main".to_string()
}

fn default_thread_group() -> [u32; 3] {
    [8, 8, 1]
}

fn clamped_history_count<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let count = usize::deserialize(deserializer)?;
    Ok(count.min(MAX_COMPUTE_HISTORY))
}

impl ComputeEffect {
    pub fn new(name: impl Into<String>, source: impl Into<String>, kind: ComputeEffectKind) -> Self {
        Self {
            id: EffectId::next(),
            name: name.into(),
            source: source.into(),
            entry_point: default_entry_point(),
            kind,
            params: [0.0; 4],
            thread_group: default_thread_group(),
            history_count: 0,
            enabled: true,
            shader: ShaderSlot::default(),
        }
    }

    pub fn with_history(mut self, count: usize) -> Self {
        self.set_history_count(count);
        self
    }

    pub fn with_params(mut self, params: [f32; 4]) -> Self {
        self.params = params;
        self
    }

    pub fn with_thread_group(mut self, thread_group: [u32; 3]) -> Self {
        self.thread_group = thread_group;
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self.shader.mark_dirty();
        self
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.shader.mark_dirty();
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn history_count(&self) -> usize {
        self.history_count
    }

    /// Clamped to the eight history slots of the compute layout.
    pub fn set_history_count(&mut self, count: usize) {
        self.history_count = count.min(MAX_COMPUTE_HISTORY);
    }

    pub fn compile_state(&self) -> &CompileState {
        &self.shader.state
    }

    pub fn compiled_bytes(&self) -> usize {
        self.shader.compiled_bytes
    }

    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.name.clone(), self.source.clone(), self.kind)
            .with_params(self.params)
            .with_thread_group(self.thread_group)
            .with_history(self.history_count);
        copy.entry_point = self.entry_point.clone();
        copy.enabled = self.enabled;
        copy
    }

    pub(crate) fn compile_request(&self, mode: CompileMode) -> CompileRequest<'_> {
        CompileRequest {
            label: &self.name,
            source: &self.source,
            entry_point: &self.entry_point,
            target: ShaderTarget::Compute,
            mode,
        }
    }
}
