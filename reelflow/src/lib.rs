//! # Reelflow
//!
//! A durable orchestrator for script-to-video generation pipelines.
//!
//! Each project moves through five stages: script, casting, assets, compose
//! and an optional publish. Reelflow provides:
//!
//! - **A persisted state machine**: every status change is validated and
//!   stored before it is reported
//! - **Versioned outputs**: scripts, casts and asset sets are appended, never
//!   overwritten, so a stage can be regenerated from the latest inputs
//! - **Live progress**: per-project event streams with a pull-based resync
//! - **Cancellation and admission control**: cooperative stops at stage
//!   boundaries and a bound on concurrent runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reelflow::prelude::*;
//!
//! let service = PipelineService::from_config(&OrchestratorConfig::from_env()?, providers).await?;
//! let project = service
//!     .create_project(NewProject::new("Launch video", ProjectSettings::new("A short explainer")))
//!     .await?;
//!
//! let mut events = service.subscribe(project.id);
//! let outcome = service.start(project.id).await?.wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod admission;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod stages;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::admission::{AdmissionController, BackpressurePolicy};
    pub use crate::cancellation::{CancellationController, CancellationToken};
    pub use crate::config::OrchestratorConfig;
    pub use crate::core::{
        Asset, AssetKind, AssetSet, Cast, ImageMode, MediaArtifact, NewProject, PipelineStage,
        Privacy, ProgressEvent, Project, ProjectId, ProjectSettings, ProjectStatus,
        PublishMetadata, PublishReceipt, Scene, Script, VideoFormat, VoiceConfig,
    };
    pub use crate::errors::{
        AdmissionError, ExecutionError, ProviderError, ReelflowError, StoreError,
        ValidationError,
    };
    pub use crate::events::{ProgressBroadcaster, ProgressSubscription};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Orchestrator, RetryConfig, RunOutcome};
    pub use crate::service::{PipelineService, ProjectSnapshot, RunHandle};
    pub use crate::stages::providers::{
        AssetConfig, AssetProvider, ComposeConfig, CompositionProvider, PublishProvider,
        ScriptProvider, VoiceProvider,
    };
    pub use crate::stages::{Providers, StageContext, StageExecutor, StageOutput, StageRegistry};
    pub use crate::store::{FileProjectStore, InMemoryProjectStore, LatestOutputs, ProjectStore};
}
