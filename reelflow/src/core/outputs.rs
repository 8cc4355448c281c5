//! Stage output records: scripts, casts, asset sets and their versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default scene duration when the script provider leaves it out.
pub const DEFAULT_SCENE_DURATION_SECS: f64 = 3.0;
/// Shortest accepted scene duration.
pub const MIN_SCENE_DURATION_SECS: f64 = 0.5;
/// Longest accepted scene duration.
pub const MAX_SCENE_DURATION_SECS: f64 = 60.0;

/// A single spoken scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Who speaks the line.
    pub speaker: String,
    /// The spoken text.
    pub text: String,
    /// Target duration in seconds.
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
}

const fn default_duration() -> f64 {
    DEFAULT_SCENE_DURATION_SECS
}

impl Scene {
    /// Creates a scene with the default duration.
    #[must_use]
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            duration_secs: DEFAULT_SCENE_DURATION_SECS,
        }
    }

    /// Sets the target duration.
    #[must_use]
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }
}

/// An ordered list of scenes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Scenes in playback order.
    pub scenes: Vec<Scene>,
}

impl Script {
    /// Creates a script from scenes.
    #[must_use]
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    /// Distinct speakers, sorted.
    #[must_use]
    pub fn speakers(&self) -> BTreeSet<String> {
        self.scenes.iter().map(|s| s.speaker.clone()).collect()
    }

    /// Sum of scene durations.
    #[must_use]
    pub fn total_duration_secs(&self) -> f64 {
        self.scenes.iter().map(|s| s.duration_secs).sum()
    }
}

/// Voice settings for a single speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Synthesizer voice identifier.
    pub voice_id: String,
    /// Pitch adjustment, e.g. `+5Hz`.
    #[serde(default = "default_pitch")]
    pub pitch: String,
    /// Rate adjustment, e.g. `-10%`.
    #[serde(default = "default_rate")]
    pub rate: String,
}

fn default_pitch() -> String {
    "+0Hz".to_string()
}

fn default_rate() -> String {
    "+0%".to_string()
}

impl VoiceConfig {
    /// Creates a voice config with neutral pitch and rate.
    #[must_use]
    pub fn new(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            pitch: default_pitch(),
            rate: default_rate(),
        }
    }

    /// Sets the pitch adjustment.
    #[must_use]
    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        self.pitch = pitch.into();
        self
    }

    /// Sets the rate adjustment.
    #[must_use]
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = rate.into();
        self
    }
}

/// Speaker-to-voice assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    /// Voice per speaker name.
    pub assignments: BTreeMap<String, VoiceConfig>,
}

impl Cast {
    /// Creates an empty cast.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an assignment.
    #[must_use]
    pub fn with_voice(mut self, speaker: impl Into<String>, voice: VoiceConfig) -> Self {
        self.assignments.insert(speaker.into(), voice);
        self
    }

    /// Voice for a speaker.
    #[must_use]
    pub fn voice_for(&self, speaker: &str) -> Option<&VoiceConfig> {
        self.assignments.get(speaker)
    }

    /// Number of cast speakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True when nobody is cast.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Kind of a produced media artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Synthesized speech.
    Audio,
    /// Generated or uploaded still image.
    Image,
    /// Composed video.
    Video,
}

/// A produced media artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Artifact kind.
    pub kind: AssetKind,
    /// Where the artifact lives (path or URL).
    pub locator: String,
    /// Speaker the artifact belongs to, for audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Scene the artifact belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_index: Option<usize>,
}

impl Asset {
    /// Creates an audio asset for a scene.
    #[must_use]
    pub fn audio(locator: impl Into<String>, speaker: impl Into<String>, scene_index: usize) -> Self {
        Self {
            kind: AssetKind::Audio,
            locator: locator.into(),
            speaker: Some(speaker.into()),
            scene_index: Some(scene_index),
        }
    }

    /// Creates an image asset.
    #[must_use]
    pub fn image(locator: impl Into<String>, scene_index: Option<usize>) -> Self {
        Self {
            kind: AssetKind::Image,
            locator: locator.into(),
            speaker: None,
            scene_index,
        }
    }

    /// Creates a video asset.
    #[must_use]
    pub fn video(locator: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Video,
            locator: locator.into(),
            speaker: None,
            scene_index: None,
        }
    }
}

/// The media artifacts belonging to a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSet {
    /// Artifacts in production order.
    pub items: Vec<Asset>,
}

impl AssetSet {
    /// Creates an asset set.
    #[must_use]
    pub fn new(items: Vec<Asset>) -> Self {
        Self { items }
    }

    /// Artifacts of a kind.
    pub fn of_kind(&self, kind: AssetKind) -> impl Iterator<Item = &Asset> {
        self.items.iter().filter(move |a| a.kind == kind)
    }

    /// Number of artifacts of a kind.
    #[must_use]
    pub fn count(&self, kind: AssetKind) -> usize {
        self.of_kind(kind).count()
    }

    /// The composed video, if any.
    #[must_use]
    pub fn video(&self) -> Option<&Asset> {
        self.of_kind(AssetKind::Video).last()
    }

    /// Every artifact except composed videos.
    #[must_use]
    pub fn without_video(&self) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|a| a.kind != AssetKind::Video)
                .cloned()
                .collect(),
        }
    }

    /// Replaces any video with `video`, keeping the other artifacts.
    #[must_use]
    pub fn with_video(&self, video: Asset) -> Self {
        let mut next = self.without_video();
        next.items.push(video);
        next
    }

    /// Number of artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The composed media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    /// Where the rendered file lives.
    pub locator: String,
    /// Rendered duration, when the composer reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl MediaArtifact {
    /// Creates a media artifact.
    #[must_use]
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            duration_secs: None,
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }
}

/// Identifiers returned by the remote platform after publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Remote id.
    pub remote_id: String,
    /// Public URL.
    pub remote_url: String,
}

impl PublishReceipt {
    /// Creates a receipt.
    #[must_use]
    pub fn new(remote_id: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            remote_url: remote_url.into(),
        }
    }
}

/// An append-only, numbered version of a stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// 1-based version number.
    pub version: u32,
    /// When this version was written.
    pub created_at: DateTime<Utc>,
    /// The output itself.
    pub value: T,
}

impl<T> Versioned<T> {
    /// Wraps a value as a given version.
    #[must_use]
    pub fn new(version: u32, value: T) -> Self {
        Self {
            version,
            created_at: Utc::now(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_speakers_are_distinct() {
        let script = Script::new(vec![
            Scene::new("Host", "Welcome"),
            Scene::new("Expert", "Data says"),
            Scene::new("Host", "Thanks"),
        ]);

        let speakers: Vec<_> = script.speakers().into_iter().collect();
        assert_eq!(speakers, vec!["Expert".to_string(), "Host".to_string()]);
        assert!((script.total_duration_secs() - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scene_duration_defaults_on_deserialize() {
        let scene: Scene = serde_json::from_str(r#"{"speaker":"A","text":"hi"}"#).unwrap();
        assert!((scene.duration_secs - DEFAULT_SCENE_DURATION_SECS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_with_video_replaces_previous_video() {
        let set = AssetSet::new(vec![
            Asset::audio("a0.mp3", "Host", 0),
            Asset::video("old.mp4"),
        ]);

        let next = set.with_video(Asset::video("new.mp4"));

        assert_eq!(next.count(AssetKind::Audio), 1);
        assert_eq!(next.count(AssetKind::Video), 1);
        assert_eq!(next.video().map(|v| v.locator.as_str()), Some("new.mp4"));
        // the prior value is untouched
        assert_eq!(set.video().map(|v| v.locator.as_str()), Some("old.mp4"));
    }

    #[test]
    fn test_voice_config_defaults() {
        let voice: VoiceConfig = serde_json::from_str(r#"{"voice_id":"en-US-AriaNeural"}"#).unwrap();
        assert_eq!(voice.pitch, "+0Hz");
        assert_eq!(voice.rate, "+0%");
    }

    #[test]
    fn test_asset_kind_wire_names() {
        assert_eq!(serde_json::to_string(&AssetKind::Audio).unwrap(), r#""audio""#);
        assert_eq!(serde_json::to_string(&AssetKind::Video).unwrap(), r#""video""#);
    }
}
