//! Core library for Beatline, a beat-synchronized demo engine.
//!
//! A demo is a set of shader scenes driven by a beat-indexed track. Each
//! frame the [`DemoPlayer`] advances the [`Transport`], fires the tracker rows
//! that were crossed, renders the active scene through its effect chains and
//! blends scenes while a transition is in flight. GPU work goes through the
//! [`GpuDevice`] seam, shader compilation through [`CompilationService`] and
//! audio through [`AudioService`], so the whole engine also runs headless.

pub mod assets;
pub mod audio;
pub mod beat;
pub mod config;
pub mod error;
pub mod gpu;
pub mod player;
pub mod project;
pub mod render;
pub mod scene;
pub mod shader;
pub mod timeline;

pub use assets::AssetStore;
pub use audio::{AudioService, ManualAudio, ManualAudioHandle, NullAudio};
pub use beat::{BeatClock, Subdivision};
pub use config::{EngineConfig, PlaybackConfig, RenderConfig};
pub use error::{BeatlineError, Result};
pub use gpu::{GpuDevice, HeadlessDevice, ImageHandle, TextureDimension};
pub use player::DemoPlayer;
pub use project::{AudioClip, AudioKind, ProjectData};
pub use render::{
    ActiveScene, EffectChainProcessor, FrameParams, RenderGraph, TransitionCompositor,
    TransitionPreset,
};
pub use scene::{ComputeEffect, ComputeEffectKind, EffectId, PostFxEffect, Scene, TextureBinding};
pub use shader::{CompilationService, CompileMode, CompileState, Diagnostic, HeadlessCompiler};
pub use timeline::{
    Beat, DemoTrack, PlaybackEvent, PlaybackService, SceneCommand, TrackerRow, Transport,
    TransportState,
};
