use std::sync::Arc;

use super::{check_status, read_json, Draft, Project};
use crate::error::Result;
use crate::http_client::ApiClient;

/// Client for `/projects`
pub struct ProjectsApi {
    client: Arc<ApiClient>,
}

impl ProjectsApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        let response = self.client.get("projects").await?;
        let projects: Vec<Project> = read_json(response, "Failed to fetch projects").await?;
        tracing::debug!("Fetched {} projects", projects.len());
        Ok(projects)
    }

    pub async fn get(&self, project_id: &str) -> Result<Project> {
        let response = self.client.get(&project_path(project_id)).await?;
        read_json(response, "Failed to fetch project").await
    }

    pub async fn create(&self, draft: &Draft) -> Result<Project> {
        let response = self.client.post_json("projects", draft).await?;
        let project: Project = read_json(response, "Failed to create project").await?;
        tracing::info!("Created project {} ({})", project.name, project.id);
        Ok(project)
    }

    pub async fn update(&self, project_id: &str, draft: &Draft) -> Result<Project> {
        let response = self
            .client
            .put_json(&project_path(project_id), draft)
            .await?;
        let project: Project = read_json(response, "Failed to update project").await?;
        tracing::info!("Updated project {}", project.id);
        Ok(project)
    }

    pub async fn delete(&self, project_id: &str) -> Result<()> {
        let response = self.client.delete(&project_path(project_id)).await?;
        check_status(response, "Failed to delete project").await?;
        tracing::info!("Deleted project {}", project_id);
        Ok(())
    }
}

fn project_path(project_id: &str) -> String {
    format!("projects/{}", project_id)
}
