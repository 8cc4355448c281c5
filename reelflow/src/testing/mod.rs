//! Testing utilities for reelflow pipelines.
//!
//! This module provides:
//! - Scripted providers with call counting, failure scripting and gates
//! - A service harness over an in-memory store
//! - Assertions over progress event streams

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_no_event, assert_progress_monotonic, assert_status_path, assert_status_subsequence,
    statuses,
};
pub use fixtures::{sample_script, TestHarness};
pub use mocks::{
    Gate, ProviderControl, ScriptedAssetProvider, ScriptedCompositionProvider, ScriptedProviders,
    ScriptedPublishProvider, ScriptedScriptProvider, ScriptedVoiceProvider,
};
