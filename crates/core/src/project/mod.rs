//! On-disk project document: scenes, audio clips and the demo track.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{config::DEFAULT_BPM, scene::Scene, timeline::DemoTrack, Result};

/// Serializes `Option<usize>` as a signed index where `-1` means "none".
pub(crate) mod optional_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(index) => serializer.serialize_u64(*index as u64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioKind {
    #[default]
    Music,
    OneShot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    #[serde(default)]
    pub name: String,
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: AudioKind,
    /// Tempo the clip was authored at. Zero when unknown.
    #[serde(default)]
    pub bpm: f32,
}

impl AudioClip {
    pub fn music(path: impl Into<String>, bpm: f32) -> Self {
        let path = path.into();
        Self {
            name: clip_name(&path),
            path,
            kind: AudioKind::Music,
            bpm,
        }
    }

    pub fn one_shot(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: clip_name(&path),
            path,
            kind: AudioKind::OneShot,
            bpm: 0.0,
        }
    }
}

fn clip_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(rename = "audio", default)]
    pub audio_library: Vec<AudioClip>,
    #[serde(default)]
    pub track: DemoTrack,
    #[serde(default = "default_bpm")]
    pub bpm: f32,
}

fn default_bpm() -> f32 {
    DEFAULT_BPM
}

impl Default for ProjectData {
    fn default() -> Self {
        Self {
            scenes: Vec::new(),
            audio_library: Vec::new(),
            track: DemoTrack::default(),
            bpm: DEFAULT_BPM,
        }
    }
}

impl ProjectData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let project = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            scenes = project.scenes.len(),
            rows = project.track.rows().len(),
            "loaded project"
        );
        Ok(project)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn clip(&self, index: usize) -> Option<&AudioClip> {
        self.audio_library.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gpu::TextureDimension,
        scene::{BindingKind, TextureBinding},
        timeline::TrackerRow,
    };

    const DOCUMENT: &str = r#"{
        "bpm": 128,
        "scenes": [
            {
                "name": "tunnel",
                "code": "fn main() {}",
                "bindings": [
                    { "channel": 0, "bindType": "Scene", "sourceIndex": 1, "type": "Texture2D" },
                    { "channel": 1, "bindType": "File", "sourceIndex": -1, "path": "sky.dds", "type": "TextureCube" }
                ]
            },
            { "name": "plasma", "code": "fn main() {}" }
        ],
        "audio": [ { "name": "song", "path": "song.ogg", "type": "Music", "bpm": 128 } ],
        "track": {
            "name": "main",
            "bpm": 128,
            "len": 32,
            "rows": [
                { "id": 16, "scene": 1, "transStem": "crossfade", "dur": 4, "music": -1, "oneshot": -1 },
                { "id": 0, "scene": 0, "music": 0, "oneshot": -1 }
            ]
        }
    }"#;

    #[test]
    fn parses_project_document() {
        let project = ProjectData::from_json_str(DOCUMENT).unwrap();
        assert_eq!(project.bpm, 128.0);
        assert_eq!(project.scenes.len(), 2);

        let bindings = &project.scenes[0].bindings;
        assert_eq!(bindings[0].kind, BindingKind::Scene);
        assert_eq!(bindings[0].source_scene, Some(1));
        assert_eq!(bindings[1].source_scene, None);
        assert_eq!(bindings[1].dimension, TextureDimension::Cube);

        let rows = project.track.rows();
        assert_eq!(rows[0].row_id, 0);
        assert_eq!(rows[0].music_index, Some(0));
        assert_eq!(rows[1].one_shot_index, None);
        assert!(rows[1].has_transition());
        assert_eq!(project.track.last_triggered_beat, -1);
        assert_eq!(project.clip(0).map(|clip| clip.kind), Some(AudioKind::Music));
    }

    #[test]
    fn written_documents_keep_sentinel_indices() {
        let mut project = ProjectData::default();
        project.scenes.push(Scene::new("a", "fn main() {}"));
        project
            .scenes
            .push(Scene::new("b", "fn main() {}").with_binding(TextureBinding::scene(0, 0)));
        project.track = DemoTrack::new(120.0, 8).with_row(TrackerRow::at(4).with_scene(1));

        let text = project.to_json_string().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["track"]["rows"][0]["music"], -1);
        assert_eq!(value["track"]["rows"][0]["scene"], 1);

        let reloaded = ProjectData::from_json_str(&text).unwrap();
        assert_eq!(reloaded.track.rows(), project.track.rows());
        assert_eq!(reloaded.scenes[1].bindings[0].source_scene, Some(0));
    }

    #[test]
    fn clip_names_default_to_file_stem() {
        assert_eq!(AudioClip::music("music/intro.ogg", 120.0).name, "intro");
        assert_eq!(AudioClip::one_shot("hit.wav").kind, AudioKind::OneShot);
    }
}
