use crate::error::Result;
use crate::jobs::{FetchJob, JobQueue};
use crate::model::{Professor, ProfessorId, Project};
use crate::store::Store;
use std::sync::Arc;
use tracing::info;

/// Read access to professors and their projects, and the entry point for
/// refreshing them.
#[derive(Clone)]
pub struct ProfessorService {
    store: Store,
    queue: Arc<JobQueue>,
}

impl ProfessorService {
    pub fn new(store: Store, queue: Arc<JobQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn list_professors(&self) -> Result<Vec<Professor>> {
        self.store.list_professors().await
    }

    pub async fn get_professor(&self, id: ProfessorId) -> Result<Professor> {
        self.store.get_professor(id).await
    }

    pub async fn projects_for(&self, professor: &Professor) -> Result<Vec<Project>> {
        self.store.projects_for(professor.id).await
    }

    /// Queue a fetch of the professor's projects and return without waiting
    /// for it.
    pub async fn request_project_refresh(&self, id: ProfessorId) -> Result<Professor> {
        let professor = self.store.get_professor(id).await?;
        self.queue.enqueue(FetchJob::new(professor.id))?;
        info!(professor = %professor, id = %professor.id, "project refresh requested");
        Ok(professor)
    }
}
