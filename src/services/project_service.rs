use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use crate::common::models::{from_document, to_document, Project, Subproject};
use crate::store::{paths, DocumentStore, FieldUpdate};

/// Id of the reserved project that collects sessions without a project.
pub const UNSET_PROJECT_ID: &str = "unset";
const UNSET_PROJECT_NAME: &str = "No project";

#[derive(Clone)]
pub struct ProjectService {
    store: Arc<DocumentStore>,
}

impl ProjectService {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    async fn load(&self, uid: &str, project_id: &str) -> anyhow::Result<Option<Project>> {
        match self.store.get(&paths::project(uid, project_id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    async fn save(&self, uid: &str, project: &Project) -> anyhow::Result<()> {
        self.store
            .set(&paths::project(uid, &project.project_id), to_document(project)?)
            .await
    }

    pub async fn ensure_unset_project(&self, uid: &str) -> bool {
        let path = paths::project(uid, UNSET_PROJECT_ID);
        match self.store.exists(&path).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!("[PROJECTS] Lookup of {} failed: {}", path, e);
                return false;
            }
        }
        let project = Project {
            project_id: UNSET_PROJECT_ID.to_string(),
            name: UNSET_PROJECT_NAME.to_string(),
            color: None,
            is_unset: true,
            subprojects: Vec::new(),
            total_minutes: 0,
            created_at: Utc::now(),
        };
        match self.save(uid, &project).await {
            Ok(()) => true,
            Err(e) => {
                error!("[PROJECTS] Failed to create the reserved project for {}: {}", uid, e);
                false
            }
        }
    }

    /// Reserved project first, then by creation time.
    pub async fn get_projects(&self, uid: &str) -> Vec<Project> {
        self.ensure_unset_project(uid).await;
        let mut projects: Vec<Project> = match self.store.list(&paths::projects(uid)).await {
            Ok(docs) => docs.iter().filter_map(|d| from_document(&d.data).ok()).collect(),
            Err(e) => {
                warn!("[PROJECTS] Failed to list projects of {}: {}", uid, e);
                return Vec::new();
            }
        };
        projects.sort_by(|a, b| b.is_unset.cmp(&a.is_unset).then(a.created_at.cmp(&b.created_at)));
        projects
    }

    pub async fn create_project(&self, uid: &str, name: &str, color: Option<&str>) -> Option<Project> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let project = Project {
            project_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            color: color.map(str::to_string),
            is_unset: false,
            subprojects: Vec::new(),
            total_minutes: 0,
            created_at: Utc::now(),
        };
        match self.save(uid, &project).await {
            Ok(()) => {
                info!("[PROJECTS] {} created project '{}'", uid, name);
                Some(project)
            }
            Err(e) => {
                error!("[PROJECTS] Failed to create project '{}': {}", name, e);
                None
            }
        }
    }

    pub async fn rename_project(&self, uid: &str, project_id: &str, name: &str) -> bool {
        let name = name.trim();
        if project_id == UNSET_PROJECT_ID || name.is_empty() {
            return false;
        }
        let result = self
            .store
            .update(&paths::project(uid, project_id), vec![("name".to_string(), FieldUpdate::set(name))])
            .await;
        if let Err(e) = &result {
            warn!("[PROJECTS] Rename of {} failed: {}", project_id, e);
        }
        result.is_ok()
    }

    /// The reserved project cannot be deleted.
    pub async fn delete_project(&self, uid: &str, project_id: &str) -> bool {
        if project_id == UNSET_PROJECT_ID {
            warn!("[PROJECTS] Refusing to delete the reserved project of {}", uid);
            return false;
        }
        match self.store.delete(&paths::project(uid, project_id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[PROJECTS] Delete of {} failed: {}", project_id, e);
                false
            }
        }
    }

    pub async fn add_subproject(&self, uid: &str, project_id: &str, name: &str) -> Option<Subproject> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut project = match self.load(uid, project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return None,
            Err(e) => {
                warn!("[PROJECTS] {}", e);
                return None;
            }
        };
        let subproject = Subproject {
            subproject_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            total_minutes: 0,
        };
        project.subprojects.push(subproject.clone());
        match self.save(uid, &project).await {
            Ok(()) => Some(subproject),
            Err(e) => {
                error!("[PROJECTS] Failed to add subproject to {}: {}", project_id, e);
                None
            }
        }
    }

    pub async fn remove_subproject(&self, uid: &str, project_id: &str, subproject_id: &str) -> bool {
        let mut project = match self.load(uid, project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return false,
            Err(e) => {
                warn!("[PROJECTS] {}", e);
                return false;
            }
        };
        let before = project.subprojects.len();
        project.subprojects.retain(|s| s.subproject_id != subproject_id);
        if project.subprojects.len() == before {
            return false;
        }
        self.save(uid, &project).await.is_ok()
    }

    /// Credit `minutes` to a project and optionally one of its subprojects.
    ///
    /// Unknown project ids are credited to the reserved project.
    pub async fn add_focus_minutes(
        &self,
        uid: &str,
        project_id: Option<&str>,
        subproject_id: Option<&str>,
        minutes: u32,
    ) -> bool {
        match self.try_add_minutes(uid, project_id, subproject_id, minutes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[PROJECTS] Failed to credit {} minutes for {}: {:#}", minutes, uid, e);
                false
            }
        }
    }

    async fn try_add_minutes(
        &self,
        uid: &str,
        project_id: Option<&str>,
        subproject_id: Option<&str>,
        minutes: u32,
    ) -> anyhow::Result<()> {
        let found = match project_id {
            Some(id) => self.load(uid, id).await?,
            None => None,
        };
        let mut project = match found {
            Some(project) => project,
            None => {
                self.ensure_unset_project(uid).await;
                self.load(uid, UNSET_PROJECT_ID)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("reserved project missing for {}", uid))?
            }
        };
        project.total_minutes += u64::from(minutes);
        if let Some(sub_id) = subproject_id {
            if let Some(sub) = project.subprojects.iter_mut().find(|s| s.subproject_id == sub_id) {
                sub.total_minutes += u64::from(minutes);
            }
        }
        self.save(uid, &project).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> ProjectService {
        ProjectService::new(Arc::new(DocumentStore::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn reserved_project_is_listed_first_and_protected() {
        let projects = service().await;
        projects.create_project("u1", "Thesis", Some("#ff0000")).await.unwrap();
        let listed = projects.get_projects("u1").await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].project_id, UNSET_PROJECT_ID);
        assert!(!projects.delete_project("u1", UNSET_PROJECT_ID).await);
        assert!(!projects.rename_project("u1", UNSET_PROJECT_ID, "Other").await);
    }

    #[tokio::test]
    async fn rename_and_delete() {
        let projects = service().await;
        let p = projects.create_project("u1", "Thesis", None).await.unwrap();
        assert!(projects.rename_project("u1", &p.project_id, "Dissertation").await);
        assert_eq!(projects.get_projects("u1").await[1].name, "Dissertation");
        assert!(projects.delete_project("u1", &p.project_id).await);
        assert_eq!(projects.get_projects("u1").await.len(), 1);
        assert!(projects.create_project("u1", "  ", None).await.is_none());
    }

    #[tokio::test]
    async fn minutes_flow_to_project_and_subproject() {
        let projects = service().await;
        let p = projects.create_project("u1", "Thesis", None).await.unwrap();
        let sub = projects.add_subproject("u1", &p.project_id, "Chapter 1").await.unwrap();

        assert!(projects.add_focus_minutes("u1", Some(&p.project_id), Some(&sub.subproject_id), 25).await);
        assert!(projects.add_focus_minutes("u1", None, None, 10).await);
        assert!(projects.add_focus_minutes("u1", Some("gone"), None, 5).await);

        let listed = projects.get_projects("u1").await;
        assert_eq!(listed[0].total_minutes, 15);
        assert_eq!(listed[1].total_minutes, 25);
        assert_eq!(listed[1].subprojects[0].total_minutes, 25);

        assert!(projects.remove_subproject("u1", &p.project_id, &sub.subproject_id).await);
        assert!(!projects.remove_subproject("u1", &p.project_id, &sub.subproject_id).await);
    }
}
