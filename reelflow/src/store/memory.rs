//! In-memory project store.

use super::{OutputHistory, ProjectRecord, ProjectStore};
use crate::core::{AssetSet, Cast, Project, ProjectId, Script};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Project store backed by a map, for tests and single-process use.
///
/// [`set_available`](Self::set_available) simulates an outage: while
/// unavailable every operation fails with [`StoreError::Unavailable`].
#[derive(Debug)]
pub struct InMemoryProjectStore {
    records: RwLock<HashMap<ProjectId, ProjectRecord>>,
    available: AtomicBool,
}

impl Default for InMemoryProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when no project is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        }
    }

    fn with_record<T>(
        &self,
        id: ProjectId,
        f: impl FnOnce(&mut ProjectRecord) -> T,
    ) -> Result<T, StoreError> {
        self.check_available()?;
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        Ok(f(record))
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        self.check_available()?;
        project.check_invariants()?;
        self.records
            .write()
            .insert(project.id, ProjectRecord::new(project.clone()));
        Ok(())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.check_available()?;
        self.records
            .read()
            .get(&id)
            .map(|r| r.project.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_project(&self, project: &Project) -> Result<(), StoreError> {
        project.check_invariants()?;
        self.with_record(project.id, |record| record.project = project.clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.check_available()?;
        let mut projects: Vec<Project> = self
            .records
            .read()
            .values()
            .map(|r| r.project.clone())
            .collect();
        projects.sort_by_key(|p| (p.created_at, p.id));
        Ok(projects)
    }

    async fn append_script(&self, id: ProjectId, script: Script) -> Result<u32, StoreError> {
        self.with_record(id, |record| record.append_script(script))
    }

    async fn append_cast(&self, id: ProjectId, cast: Cast) -> Result<u32, StoreError> {
        self.with_record(id, |record| record.append_cast(cast))
    }

    async fn append_asset_set(&self, id: ProjectId, assets: AssetSet) -> Result<u32, StoreError> {
        self.with_record(id, |record| record.append_asset_set(assets))
    }

    async fn history(&self, id: ProjectId) -> Result<OutputHistory, StoreError> {
        self.with_record(id, |record| record.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NewProject, ProjectSettings, Scene, Transition};

    fn draft() -> Project {
        Project::new(NewProject::new("Test", ProjectSettings::new("prompt")))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryProjectStore::new();
        let project = draft();
        store.insert_project(&project).await.unwrap();

        let loaded = store.get_project(project.id).await.unwrap();
        assert_eq!(loaded, project);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = InMemoryProjectStore::new();
        let err = store.get_project(ProjectId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_rejects_invariant_violation() {
        let store = InMemoryProjectStore::new();
        let mut project = draft();
        store.insert_project(&project).await.unwrap();

        project.error_message = Some("stray".into());
        let err = store.update_project(&project).await.unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation(_)));

        let stored = store.get_project(project.id).await.unwrap();
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_persists_transition() {
        let store = InMemoryProjectStore::new();
        let mut project = draft();
        store.insert_project(&project).await.unwrap();

        project.apply(Transition::Fail("boom".into())).unwrap();
        store.update_project(&project).await.unwrap();

        let stored = store.get_project(project.id).await.unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_outputs_are_versioned() {
        let store = InMemoryProjectStore::new();
        let project = draft();
        store.insert_project(&project).await.unwrap();

        let v1 = store
            .append_script(project.id, Script::new(vec![Scene::new("A", "one")]))
            .await
            .unwrap();
        let v2 = store
            .append_script(project.id, Script::new(vec![Scene::new("A", "two")]))
            .await
            .unwrap();
        assert_eq!((v1, v2), (1, 2));

        let latest = store.latest_script(project.id).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.value.scenes[0].text, "two");

        let history = store.history(project.id).await.unwrap();
        assert_eq!(history.scripts.len(), 2);
        assert_eq!(history.scripts[0].value.scenes[0].text, "one");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = InMemoryProjectStore::new();
        let project = draft();
        store.insert_project(&project).await.unwrap();

        store.set_available(false);
        assert!(matches!(
            store.get_project(project.id).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.append_cast(project.id, Cast::new()).await.is_err());

        store.set_available(true);
        assert!(store.get_project(project.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_projects_oldest_first() {
        let store = InMemoryProjectStore::new();
        let first = draft();
        let second = draft();
        store.insert_project(&second).await.unwrap();
        store.insert_project(&first).await.unwrap();

        let ids: Vec<_> = store
            .list_projects()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
