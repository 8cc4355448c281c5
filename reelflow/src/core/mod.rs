//! Core domain model types for reelflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Project status and pipeline stage enums
//! - The project record and its transition table
//! - Versioned stage outputs
//! - Progress events

mod event;
mod outputs;
mod project;
mod status;

pub use event::ProgressEvent;
pub use outputs::{
    Asset, AssetKind, AssetSet, Cast, MediaArtifact, PublishReceipt, Scene, Script, Versioned,
    VoiceConfig, DEFAULT_SCENE_DURATION_SECS, MAX_SCENE_DURATION_SECS, MIN_SCENE_DURATION_SECS,
};
pub use project::{
    ImageMode, NewProject, Privacy, Project, ProjectId, ProjectSettings, PublishMetadata,
    Transition, VideoFormat, DEFAULT_MUSIC_VOLUME, MAX_PROMPT_CHARS,
};
pub use status::{PipelineStage, ProjectStatus};
