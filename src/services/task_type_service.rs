//! Task type service: template definitions with per-type defaults.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DuplicateHandling, Project, TaskType};
use crate::domain::ports::StorageBackend;
use crate::services::template;

/// Input for task type creation. Absent retry/lease values inherit from the
/// project's defaults at creation time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskTypeInput {
    pub name: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub duplicate_handling: Option<DuplicateHandling>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub lease_duration_minutes: Option<u32>,
}

/// Partial update of a task type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskTypeInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub duplicate_handling: Option<DuplicateHandling>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub lease_duration_minutes: Option<u32>,
}

#[derive(Clone)]
pub struct TaskTypeService {
    storage: Arc<dyn StorageBackend>,
}

impl TaskTypeService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self, input), fields(name = %input.name), err)]
    pub async fn create(
        &self,
        project: &Project,
        input: CreateTaskTypeInput,
    ) -> DomainResult<TaskType> {
        let now = Utc::now();
        let variables = input
            .template
            .as_deref()
            .map(template::extract)
            .unwrap_or_default();
        let task_type = TaskType {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: input.name,
            template: input.template,
            variables,
            duplicate_handling: input.duplicate_handling.unwrap_or_default(),
            max_retries: input
                .max_retries
                .unwrap_or(project.config.default_max_retries),
            lease_duration_minutes: input
                .lease_duration_minutes
                .unwrap_or(project.config.default_lease_duration_minutes),
            created_at: now,
            updated_at: now,
        };
        task_type.validate().map_err(DomainError::Validation)?;
        self.storage.create_task_type(&task_type).await?;
        Ok(task_type)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, project_id: Uuid, id: Uuid) -> DomainResult<TaskType> {
        self.storage
            .get_task_type(project_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found("task type", id))
    }

    /// Resolve a task type reference that is either a UUID or a name unique
    /// within the project.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, project_id: Uuid, reference: &str) -> DomainResult<TaskType> {
        if let Ok(id) = reference.parse::<Uuid>() {
            if let Some(task_type) = self.storage.get_task_type(project_id, id).await? {
                return Ok(task_type);
            }
        }
        self.storage
            .find_task_type_by_name(project_id, reference)
            .await?
            .ok_or_else(|| DomainError::not_found("task type", reference))
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>> {
        self.storage.list_task_types(project_id).await
    }

    #[instrument(skip(self, input), err)]
    pub async fn update(
        &self,
        project_id: Uuid,
        id: Uuid,
        input: UpdateTaskTypeInput,
    ) -> DomainResult<TaskType> {
        let mut task_type = self.get(project_id, id).await?;
        if let Some(name) = input.name {
            task_type.name = name;
        }
        if let Some(new_template) = input.template {
            task_type.variables = template::extract(&new_template);
            task_type.template = Some(new_template);
        }
        if let Some(policy) = input.duplicate_handling {
            task_type.duplicate_handling = policy;
        }
        if let Some(max_retries) = input.max_retries {
            task_type.max_retries = max_retries;
        }
        if let Some(lease) = input.lease_duration_minutes {
            task_type.lease_duration_minutes = lease;
        }
        task_type.updated_at = Utc::now();
        task_type.validate().map_err(DomainError::Validation)?;
        self.storage.update_task_type(&task_type).await?;
        Ok(task_type)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, project_id: Uuid, id: Uuid) -> DomainResult<()> {
        self.storage.delete_task_type(project_id, id).await
    }
}
