//! Project lifecycle service.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Project, ProjectConfig, ProjectStatus};
use crate::domain::ports::{StorageBackend, TaskFilter};

/// Input for project creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub config: Option<ProjectConfigPatch>,
}

/// Partial update of a project's mutable fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectInput {
    /// Rename; the new name must not be held by any other project,
    /// active or closed.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub config: Option<ProjectConfigPatch>,
}

/// Partial override of the per-project defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfigPatch {
    #[serde(default)]
    pub default_max_retries: Option<u32>,
    #[serde(default)]
    pub default_lease_duration_minutes: Option<u32>,
    #[serde(default)]
    pub reaper_interval_minutes: Option<u32>,
}

impl ProjectConfigPatch {
    fn apply(&self, config: &mut ProjectConfig) {
        if let Some(v) = self.default_max_retries {
            config.default_max_retries = v;
        }
        if let Some(v) = self.default_lease_duration_minutes {
            config.default_lease_duration_minutes = v;
        }
        if let Some(v) = self.reaper_interval_minutes {
            config.reaper_interval_minutes = v;
        }
    }
}

/// Live operational view of a project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatusView {
    pub project: Project,
    /// Number of queued tasks awaiting dispatch.
    pub queue_depth: u64,
    /// Number of agents currently holding a lease.
    pub active_agents: u64,
    /// Most recently updated tasks, newest first.
    pub recent_tasks: Vec<RecentTask>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTask {
    pub id: Uuid,
    pub status: String,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct ProjectService {
    storage: Arc<dyn StorageBackend>,
    defaults: ProjectConfig,
}

impl ProjectService {
    pub fn new(storage: Arc<dyn StorageBackend>, defaults: ProjectConfig) -> Self {
        Self { storage, defaults }
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    pub async fn create(&self, input: CreateProjectInput) -> DomainResult<Project> {
        Project::validate_name(&input.name).map_err(DomainError::Validation)?;

        let mut config = self.defaults.clone();
        if let Some(patch) = &input.config {
            patch.apply(&mut config);
        }
        config.validate().map_err(DomainError::Validation)?;

        let mut project = Project::new(input.name, input.description);
        project.instructions = input.instructions;
        project.config = config;

        self.storage.create_project(&project).await?;
        Ok(project)
    }

    /// Fetch by id with stats recomputed from current task counts.
    #[instrument(skip(self), err)]
    pub async fn get(&self, id: Uuid) -> DomainResult<Project> {
        self.storage
            .get_project(id)
            .await?
            .ok_or_else(|| DomainError::not_found("project", id))
    }

    /// Resolve a project reference that is either a UUID or a unique name.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, reference: &str) -> DomainResult<Project> {
        if let Ok(id) = reference.parse::<Uuid>() {
            if let Some(project) = self.storage.get_project(id).await? {
                return Ok(project);
            }
        }
        self.storage
            .find_project_by_name(reference)
            .await?
            .ok_or_else(|| DomainError::not_found("project", reference))
    }

    #[instrument(skip(self, input), err)]
    pub async fn update(&self, id: Uuid, input: UpdateProjectInput) -> DomainResult<Project> {
        let mut project = self.get(id).await?;
        if let Some(name) = input.name {
            Project::validate_name(&name).map_err(DomainError::Validation)?;
            project.name = name;
        }
        if let Some(description) = input.description {
            project.description = description;
        }
        if let Some(instructions) = input.instructions {
            project.instructions = Some(instructions);
        }
        if let Some(patch) = input.config {
            patch.apply(&mut project.config);
            project.config.validate().map_err(DomainError::Validation)?;
        }
        project.updated_at = Utc::now();
        self.storage.update_project(&project).await?;
        self.get(id).await
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self, include_closed: bool) -> DomainResult<Vec<Project>> {
        self.storage.list_projects(include_closed).await
    }

    /// Close a project: existing leases keep running, but no new tasks are
    /// accepted and nothing further is dispatched.
    #[instrument(skip(self), err)]
    pub async fn close(&self, id: Uuid) -> DomainResult<Project> {
        let mut project = self.get(id).await?;
        project.status = ProjectStatus::Closed;
        project.updated_at = Utc::now();
        self.storage.update_project(&project).await?;
        self.get(id).await
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: Uuid) -> DomainResult<()> {
        self.storage.delete_project(id).await
    }

    /// Project plus live queue depth, active agent count, and recent tasks.
    #[instrument(skip(self), err)]
    pub async fn status(&self, id: Uuid) -> DomainResult<ProjectStatusView> {
        let project = self.get(id).await?;
        let agents = self.storage.list_active_agents(id).await?;

        let filter = TaskFilter {
            limit: u64::MAX,
            ..Default::default()
        };
        let page = self.storage.list_tasks(id, &filter).await?;
        let mut recent: Vec<RecentTask> = page
            .tasks
            .iter()
            .map(|t| RecentTask {
                id: t.id,
                status: t.status.as_str().to_string(),
                updated_at: t.updated_at,
            })
            .collect();
        recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        recent.truncate(10);

        Ok(ProjectStatusView {
            queue_depth: project.stats.queued,
            active_agents: agents.len() as u64,
            recent_tasks: recent,
            project,
        })
    }

    /// Fail with `NotFound` or `ProjectClosed` unless the project accepts
    /// work.
    #[instrument(skip(self), err)]
    pub async fn validate_access(&self, id: Uuid) -> DomainResult<Project> {
        let project = self.get(id).await?;
        if !project.is_active() {
            return Err(DomainError::ProjectClosed(project.name));
        }
        Ok(project)
    }

    /// [`Self::validate_access`] over a name-or-id reference.
    #[instrument(skip(self), err)]
    pub async fn validate_access_by_ref(&self, reference: &str) -> DomainResult<Project> {
        let project = self.resolve(reference).await?;
        if !project.is_active() {
            return Err(DomainError::ProjectClosed(project.name));
        }
        Ok(project)
    }
}
