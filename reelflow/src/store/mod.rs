//! Durable project state and versioned stage outputs.
//!
//! The orchestrator is the only writer. Output histories are append-only;
//! the highest version is authoritative.

mod file;
mod memory;

pub use file::FileProjectStore;
pub use memory::InMemoryProjectStore;

use crate::core::{AssetSet, Cast, Project, ProjectId, Script, Versioned};
use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Latest output versions of a project, as seen by a stage or an observer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestOutputs {
    /// Latest script.
    pub script: Option<Versioned<Script>>,
    /// Latest cast.
    pub cast: Option<Versioned<Cast>>,
    /// Latest asset set.
    pub assets: Option<Versioned<AssetSet>>,
}

/// Persistence boundary for projects and their outputs.
#[async_trait]
pub trait ProjectStore: Send + Sync + Debug {
    /// Persists a newly created project.
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    /// Reads a project.
    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError>;

    /// Overwrites a project record. Rejects records that break invariants.
    async fn update_project(&self, project: &Project) -> Result<(), StoreError>;

    /// All projects, oldest first.
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

    /// Appends a script version and returns its number.
    async fn append_script(&self, id: ProjectId, script: Script) -> Result<u32, StoreError>;

    /// Appends a cast version and returns its number.
    async fn append_cast(&self, id: ProjectId, cast: Cast) -> Result<u32, StoreError>;

    /// Appends an asset-set version and returns its number.
    async fn append_asset_set(&self, id: ProjectId, assets: AssetSet) -> Result<u32, StoreError>;

    /// Every output version of a project.
    async fn history(&self, id: ProjectId) -> Result<OutputHistory, StoreError>;

    /// Latest version of each output.
    async fn latest_outputs(&self, id: ProjectId) -> Result<LatestOutputs, StoreError> {
        Ok(self.history(id).await?.latest())
    }

    /// Latest script version.
    async fn latest_script(&self, id: ProjectId) -> Result<Option<Versioned<Script>>, StoreError> {
        Ok(self.latest_outputs(id).await?.script)
    }

    /// Latest cast version.
    async fn latest_cast(&self, id: ProjectId) -> Result<Option<Versioned<Cast>>, StoreError> {
        Ok(self.latest_outputs(id).await?.cast)
    }

    /// Latest asset-set version.
    async fn latest_asset_set(
        &self,
        id: ProjectId,
    ) -> Result<Option<Versioned<AssetSet>>, StoreError> {
        Ok(self.latest_outputs(id).await?.assets)
    }
}

/// Full output history of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputHistory {
    /// Script versions, ascending.
    #[serde(default)]
    pub scripts: Vec<Versioned<Script>>,
    /// Cast versions, ascending.
    #[serde(default)]
    pub casts: Vec<Versioned<Cast>>,
    /// Asset-set versions, ascending.
    #[serde(default)]
    pub asset_sets: Vec<Versioned<AssetSet>>,
}

impl OutputHistory {
    /// Latest version of each output.
    #[must_use]
    pub fn latest(&self) -> LatestOutputs {
        LatestOutputs {
            script: self.scripts.last().cloned(),
            cast: self.casts.last().cloned(),
            assets: self.asset_sets.last().cloned(),
        }
    }
}

fn append<T>(versions: &mut Vec<Versioned<T>>, value: T) -> u32 {
    let next = versions.last().map_or(1, |v| v.version + 1);
    versions.push(Versioned::new(next, value));
    next
}

/// A project and its outputs, stored as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProjectRecord {
    pub project: Project,
    #[serde(default)]
    pub outputs: OutputHistory,
}

impl ProjectRecord {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            outputs: OutputHistory::default(),
        }
    }

    pub fn append_script(&mut self, script: Script) -> u32 {
        append(&mut self.outputs.scripts, script)
    }

    pub fn append_cast(&mut self, cast: Cast) -> u32 {
        append(&mut self.outputs.casts, cast)
    }

    pub fn append_asset_set(&mut self, assets: AssetSet) -> u32 {
        append(&mut self.outputs.asset_sets, assets)
    }
}
