//! Directory-backed project store.

use super::{OutputHistory, ProjectRecord, ProjectStore};
use crate::core::{AssetSet, Cast, Project, ProjectId, Script};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Project store keeping one JSON document per project under a directory.
///
/// Every write replaces the whole document through a temp file and a rename,
/// so a crash never leaves a half-written record. Reads are served from a
/// cache loaded at [`open`](Self::open).
#[derive(Debug)]
pub struct FileProjectStore {
    dir: PathBuf,
    cache: RwLock<HashMap<ProjectId, ProjectRecord>>,
    write_lock: Mutex<()>,
}

impl FileProjectStore {
    /// Opens (creating if needed) a store directory and loads every record in it.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut records = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_record(&path).await {
                Ok(record) => {
                    records.insert(record.project.id, record);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable project file");
                }
            }
        }

        tracing::info!(dir = %dir.display(), projects = records.len(), "Opened project store");

        Ok(Self {
            dir,
            cache: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    /// The store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: ProjectId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write_record(&self, record: &ProjectRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        let path = self.path_for(record.project.id);
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &path).await?;
        tracing::debug!(project_id = %record.project.id, "Saved project record");
        Ok(())
    }

    /// Applies `f` to a copy of the record, writes it, then publishes it to the cache.
    async fn mutate<T>(
        &self,
        id: ProjectId,
        f: impl FnOnce(&mut ProjectRecord) -> T + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .cache
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        let out = f(&mut record);
        self.write_record(&record).await?;
        self.cache.write().insert(id, record);
        Ok(out)
    }
}

async fn load_record(path: &Path) -> Result<ProjectRecord, StoreError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ProjectStore for FileProjectStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        project.check_invariants()?;
        let _guard = self.write_lock.lock().await;
        let record = ProjectRecord::new(project.clone());
        self.write_record(&record).await?;
        self.cache.write().insert(project.id, record);
        Ok(())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.cache
            .read()
            .get(&id)
            .map(|r| r.project.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
        project.check_invariants()?;
        let updated = project.clone();
        self.mutate(project.id, move |record| record.project = updated)
            .await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut projects: Vec<Project> = self
            .cache
            .read()
            .values()
            .map(|r| r.project.clone())
            .collect();
        projects.sort_by_key(|p| (p.created_at, p.id));
        Ok(projects)
    }

    async fn append_script(&self, id: ProjectId, script: Script) -> Result<u32, StoreError> {
        self.mutate(id, move |record| record.append_script(script)).await
    }

    async fn append_cast(&self, id: ProjectId, cast: Cast) -> Result<u32, StoreError> {
        self.mutate(id, move |record| record.append_cast(cast)).await
    }

    async fn append_asset_set(&self, id: ProjectId, assets: AssetSet) -> Result<u32, StoreError> {
        self.mutate(id, move |record| record.append_asset_set(assets))
            .await
    }

    async fn history(&self, id: ProjectId) -> Result<OutputHistory, StoreError> {
        self.cache
            .read()
            .get(&id)
            .map(|r| r.outputs.clone())
            .ok_or(StoreError::NotFound(id))
    }
}
