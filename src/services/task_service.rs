//! Task and lease service.
//!
//! Creation with template-variable checks and duplicate fingerprints, bulk
//! creation with per-item errors, claim/complete/fail/extend delegation to
//! the backend's atomic primitives, and expired-lease cleanup.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    task::compute_fingerprint, Project, Task, TaskPage, TaskResult, TaskStatus, TaskType,
};
use crate::domain::ports::storage::{LeaseStats, ReclaimReport, TaskFilter};
use crate::domain::ports::StorageBackend;
use crate::services::{agent_service, template};

/// Input for single task creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    /// Required for template-less types; ignored for template types.
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// One record of a bulk creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTaskInput {
    /// Task type name or id; falls back to the batch-level type.
    #[serde(default, rename = "type")]
    pub type_ref: Option<String>,
    #[serde(flatten)]
    pub task: CreateTaskInput,
}

/// Outcome of one creation call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreateOutcome {
    pub task: Task,
    /// True when an existing task was returned under the `ignore` policy.
    pub deduplicated: bool,
}

/// Summary of a bulk creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub tasks_created: u64,
    pub duplicates_skipped: u64,
    pub errors: Vec<BulkError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkError {
    /// Index of the failing record in the request.
    pub index: usize,
    pub error: String,
}

/// Result of a claim call: the dispatched task (if any) and the agent name
/// the lease is held under, minted when the caller did not supply one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub task: Option<Task>,
    pub agent_name: String,
}

#[derive(Clone)]
pub struct TaskService {
    storage: Arc<dyn StorageBackend>,
}

impl TaskService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    fn build_task(
        project: &Project,
        task_type: &TaskType,
        input: CreateTaskInput,
    ) -> DomainResult<Task> {
        let (stored_instructions, fingerprint_instructions) = if task_type.has_template() {
            let check = template::validate(
                task_type.template.as_deref().unwrap_or_default(),
                &input.variables,
            );
            if !check.valid {
                return Err(DomainError::Validation(format!(
                    "missing template variables: {}",
                    check.missing.join(", ")
                )));
            }
            // Instructions are derived from the template at read time.
            (None, String::new())
        } else {
            let instructions = input
                .instructions
                .filter(|i| !i.trim().is_empty())
                .ok_or_else(|| {
                    DomainError::validation(
                        "instructions are required for task types without a template",
                    )
                })?;
            (Some(instructions.clone()), instructions)
        };

        let fingerprint = compute_fingerprint(
            project.id,
            task_type.id,
            &input.variables,
            &fingerprint_instructions,
        );
        let now = Utc::now();
        Ok(Task {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            project_id: project.id,
            type_id: task_type.id,
            description: input
                .description
                .unwrap_or_else(|| task_type.name.clone()),
            instructions: stored_instructions,
            variables: input.variables,
            status: TaskStatus::Queued,
            assigned_to: None,
            lease_expires_at: None,
            lease_duration_minutes: task_type.lease_duration_minutes,
            retry_count: 0,
            max_retries: task_type.max_retries,
            fingerprint,
            batch_id: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            attempts: vec![],
            version: 1,
        })
    }

    /// Render derived instructions for template-bearing types.
    async fn hydrate(&self, mut task: Task) -> DomainResult<Task> {
        if task.instructions.is_none() {
            if let Some(task_type) = self
                .storage
                .get_task_type(task.project_id, task.type_id)
                .await?
            {
                if let Some(tmpl) = task_type.template.as_deref() {
                    if !tmpl.is_empty() {
                        task.instructions = Some(template::substitute(tmpl, &task.variables));
                    }
                }
            }
        }
        Ok(task)
    }

    async fn hydrate_opt(&self, task: Option<Task>) -> DomainResult<Option<Task>> {
        match task {
            Some(task) => Ok(Some(self.hydrate(task).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, project, task_type, input), fields(project = %project.name, task_type = %task_type.name), err)]
    pub async fn create(
        &self,
        project: &Project,
        task_type: &TaskType,
        input: CreateTaskInput,
    ) -> DomainResult<TaskCreateOutcome> {
        let task = Self::build_task(project, task_type, input)?;
        let outcome = self
            .storage
            .insert_task(&task, task_type.duplicate_handling)
            .await?;
        let deduplicated = outcome.is_duplicate();
        let task = self.hydrate(outcome.into_task()).await?;
        Ok(TaskCreateOutcome { task, deduplicated })
    }

    /// Create many tasks; per-item errors never abort the batch.
    #[instrument(skip(self, project, default_type, items), fields(project = %project.name, count = items.len()), err)]
    pub async fn create_bulk(
        &self,
        project: &Project,
        default_type: Option<&TaskType>,
        items: Vec<BulkTaskInput>,
        resolved_types: &std::collections::HashMap<String, TaskType>,
    ) -> DomainResult<BatchSummary> {
        let batch_id = Uuid::new_v4();
        let mut summary = BatchSummary {
            batch_id,
            tasks_created: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
        };

        for (index, item) in items.into_iter().enumerate() {
            let task_type = match item.type_ref.as_deref() {
                Some(reference) => resolved_types.get(reference).cloned(),
                None => default_type.cloned(),
            };
            let Some(task_type) = task_type else {
                summary.errors.push(BulkError {
                    index,
                    error: "unknown or unspecified task type for this record".to_string(),
                });
                continue;
            };

            let built = Self::build_task(project, &task_type, item.task).map(|mut task| {
                task.batch_id = Some(batch_id);
                task
            });
            let result = match built {
                Ok(task) => {
                    self.storage
                        .insert_task(&task, task_type.duplicate_handling)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(outcome) if outcome.is_duplicate() => summary.duplicates_skipped += 1,
                Ok(_) => summary.tasks_created += 1,
                Err(e) => summary.errors.push(BulkError {
                    index,
                    error: e.to_string(),
                }),
            }
        }

        info!(
            batch_id = %batch_id,
            created = summary.tasks_created,
            skipped = summary.duplicates_skipped,
            errors = summary.errors.len(),
            "bulk task creation finished"
        );
        Ok(summary)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, project_id: Uuid, task_id: Uuid) -> DomainResult<Task> {
        let task = self
            .storage
            .get_task(project_id, task_id)
            .await?
            .ok_or_else(|| DomainError::not_found("task", task_id))?;
        self.hydrate(task).await
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list(&self, project_id: Uuid, filter: &TaskFilter) -> DomainResult<TaskPage> {
        let mut page = self.storage.list_tasks(project_id, filter).await?;
        let mut hydrated = Vec::with_capacity(page.tasks.len());
        for task in page.tasks {
            hydrated.push(self.hydrate(task).await?);
        }
        page.tasks = hydrated;
        Ok(page)
    }

    /// Atomically claim the next task for `agent_name`, minting a name when
    /// the caller did not supply one.
    #[instrument(skip(self, project), fields(project = %project.name), err)]
    pub async fn get_next(
        &self,
        project: &Project,
        agent_name: Option<String>,
    ) -> DomainResult<ClaimOutcome> {
        let agent_name = match agent_name {
            Some(name) => {
                agent_service::validate_name(&name)?;
                name
            }
            None => agent_service::generate_name(),
        };
        let task = self.storage.acquire_next_task(project.id, &agent_name).await?;
        let task = self.hydrate_opt(task).await?;
        if let Some(task) = &task {
            info!(task_id = %task.id, agent = %agent_name, "task dispatched");
        }
        Ok(ClaimOutcome { task, agent_name })
    }

    /// Non-mutating view of the task dispatch would hand out next.
    #[instrument(skip(self), err)]
    pub async fn peek_next(&self, project_id: Uuid) -> DomainResult<Option<Task>> {
        let task = self.storage.peek_next_task(project_id).await?;
        self.hydrate_opt(task).await
    }

    #[instrument(skip(self, result), err)]
    pub async fn complete(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
    ) -> DomainResult<Task> {
        let task = self
            .storage
            .complete_task(project_id, task_id, agent_name, result)
            .await?;
        self.hydrate(task).await
    }

    #[instrument(skip(self, result), err)]
    pub async fn fail(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
        can_retry: bool,
    ) -> DomainResult<Task> {
        let task = self
            .storage
            .fail_task(project_id, task_id, agent_name, result, can_retry)
            .await?;
        self.hydrate(task).await
    }

    #[instrument(skip(self), err)]
    pub async fn extend_lease(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        minutes: u32,
    ) -> DomainResult<Task> {
        if !(1..=1440).contains(&minutes) {
            return Err(DomainError::validation(
                "lease extension must be between 1 and 1440 minutes",
            ));
        }
        let task = self
            .storage
            .extend_lease(project_id, task_id, agent_name, minutes)
            .await?;
        self.hydrate(task).await
    }

    /// Reclaim every expired lease in the project. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn cleanup_expired_leases(&self, project_id: Uuid) -> DomainResult<ReclaimReport> {
        let report = self.storage.cleanup_expired_leases(project_id).await?;
        if !report.reclaimed_tasks.is_empty() {
            info!(
                reclaimed = report.reclaimed_tasks.len(),
                "expired leases reclaimed"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self), err)]
    pub async fn lease_stats(&self, project_id: Uuid) -> DomainResult<LeaseStats> {
        self.storage.lease_stats(project_id).await
    }
}
