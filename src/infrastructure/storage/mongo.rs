//! MongoDB storage backend.
//!
//! Entities live in four collections keyed by their `id` field. The atomic
//! queue operations use replace-one predicates scoped by task id, expected
//! status, and version stamp, so a transition raced by another instance
//! matches zero documents and is retried from selection.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Client, Collection, Database};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::page::PageInfo;
use crate::domain::models::{
    ActiveAgent, DuplicateHandling, Project, Session, Task, TaskPage, TaskResult, TaskStatus,
    TaskType,
};
use crate::domain::ports::storage::{
    HealthReport, LeaseStats, ReclaimReport, StorageBackend, TaskFilter, TaskInsertOutcome,
};

const DEFAULT_DATABASE: &str = "foreman";

/// How many times a raced conditional update is retried from selection
/// before the operation reports a conflict.
const CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct MongoBackend {
    db: Database,
}

impl MongoBackend {
    pub async fn connect(uri: &str) -> DomainResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| DomainError::Backend(format!("mongodb connect: {e}")))?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        Ok(Self { db })
    }

    fn projects(&self) -> Collection<Project> {
        self.db.collection("projects")
    }

    fn task_types(&self) -> Collection<TaskType> {
        self.db.collection("tasktypes")
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection("tasks")
    }

    fn sessions(&self) -> Collection<Session> {
        self.db.collection("sessions")
    }

    async fn load_project_tasks(&self, project_id: Uuid) -> DomainResult<Vec<Task>> {
        let cursor = self
            .tasks()
            .find(doc! { "projectId": project_id.to_string() })
            .await
            .map_err(backend_err)?;
        cursor.try_collect().await.map_err(backend_err)
    }

    async fn require_project(&self, project_id: Uuid) -> DomainResult<Project> {
        self.projects()
            .find_one(doc! { "id": project_id.to_string() })
            .await
            .map_err(backend_err)?
            .ok_or_else(|| DomainError::not_found("project", project_id))
    }

    async fn compute_stats(
        &self,
        project_id: Uuid,
    ) -> DomainResult<crate::domain::models::ProjectStats> {
        let tasks = self.load_project_tasks(project_id).await?;
        let mut stats = crate::domain::models::ProjectStats {
            total: tasks.len() as u64,
            ..Default::default()
        };
        for task in &tasks {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Replace `task` only if the stored document still carries the
    /// expected prior status and version. Returns false when raced.
    async fn replace_task_cas(
        &self,
        task: &Task,
        expected_status: TaskStatus,
        expected_version: u64,
    ) -> DomainResult<bool> {
        let filter = doc! {
            "id": task.id.to_string(),
            "status": expected_status.as_str(),
            "version": expected_version as i64,
        };
        let outcome = self
            .tasks()
            .replace_one(filter, task)
            .await
            .map_err(backend_err)?;
        Ok(outcome.modified_count == 1)
    }

    /// Reclaim expired leases; raced reclaims are skipped, never doubled.
    async fn sweep_expired(&self, project_id: Uuid) -> DomainResult<ReclaimReport> {
        let now = Utc::now();
        let mut report = ReclaimReport::default();
        for task in self.load_project_tasks(project_id).await? {
            if !task.lease_expired(now) {
                continue;
            }
            let mut reclaimed = task.clone();
            let agent = reclaimed.assigned_to.clone();
            reclaimed.record_timeout(now)?;
            if self
                .replace_task_cas(&reclaimed, TaskStatus::Running, task.version)
                .await?
            {
                report.reclaimed_tasks.push(reclaimed.id);
                if let Some(agent) = agent {
                    if !report.cleaned_agents.contains(&agent) {
                        report.cleaned_agents.push(agent);
                    }
                }
            }
        }
        Ok(report)
    }

    async fn require_task(&self, project_id: Uuid, task_id: Uuid) -> DomainResult<Task> {
        self.tasks()
            .find_one(doc! {
                "id": task_id.to_string(),
                "projectId": project_id.to_string(),
            })
            .await
            .map_err(backend_err)?
            .ok_or_else(|| DomainError::not_found("task", task_id))
    }
}

fn backend_err(e: mongodb::error::Error) -> DomainError {
    DomainError::Backend(format!("mongodb: {e}"))
}

fn queue_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl StorageBackend for MongoBackend {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    // === Projects ===

    async fn create_project(&self, project: &Project) -> DomainResult<()> {
        if self
            .projects()
            .find_one(doc! { "name": project.name.as_str() })
            .await
            .map_err(backend_err)?
            .is_some()
        {
            return Err(DomainError::Conflict {
                entity: "project",
                id: project.name.clone(),
                detail: "a project with this name already exists".to_string(),
            });
        }
        self.projects()
            .insert_one(project)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> DomainResult<Option<Project>> {
        let Some(mut project) = self
            .projects()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(backend_err)?
        else {
            return Ok(None);
        };
        project.stats = self.compute_stats(id).await?;
        Ok(Some(project))
    }

    async fn find_project_by_name(&self, name: &str) -> DomainResult<Option<Project>> {
        let Some(mut project) = self
            .projects()
            .find_one(doc! { "name": name })
            .await
            .map_err(backend_err)?
        else {
            return Ok(None);
        };
        project.stats = self.compute_stats(project.id).await?;
        Ok(Some(project))
    }

    async fn update_project(&self, project: &Project) -> DomainResult<()> {
        if self
            .projects()
            .find_one(doc! { "name": project.name.as_str(), "id": { "$ne": project.id.to_string() } })
            .await
            .map_err(backend_err)?
            .is_some()
        {
            return Err(DomainError::Conflict {
                entity: "project",
                id: project.name.clone(),
                detail: "a project with this name already exists".to_string(),
            });
        }
        let outcome = self
            .projects()
            .replace_one(doc! { "id": project.id.to_string() }, project)
            .await
            .map_err(backend_err)?;
        if outcome.matched_count == 0 {
            return Err(DomainError::not_found("project", project.id));
        }
        Ok(())
    }

    async fn list_projects(&self, include_closed: bool) -> DomainResult<Vec<Project>> {
        let filter = if include_closed {
            doc! {}
        } else {
            doc! { "status": "active" }
        };
        let cursor = self.projects().find(filter).await.map_err(backend_err)?;
        let mut projects: Vec<Project> = cursor.try_collect().await.map_err(backend_err)?;
        for project in &mut projects {
            project.stats = self.compute_stats(project.id).await?;
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn delete_project(&self, id: Uuid) -> DomainResult<()> {
        let outcome = self
            .projects()
            .delete_one(doc! { "id": id.to_string() })
            .await
            .map_err(backend_err)?;
        if outcome.deleted_count == 0 {
            return Err(DomainError::not_found("project", id));
        }
        let scope = doc! { "projectId": id.to_string() };
        self.task_types()
            .delete_many(scope.clone())
            .await
            .map_err(backend_err)?;
        self.tasks().delete_many(scope).await.map_err(backend_err)?;
        Ok(())
    }

    // === Task types ===

    async fn create_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        self.require_project(task_type.project_id).await?;
        if self
            .task_types()
            .find_one(doc! {
                "projectId": task_type.project_id.to_string(),
                "name": task_type.name.as_str(),
            })
            .await
            .map_err(backend_err)?
            .is_some()
        {
            return Err(DomainError::Conflict {
                entity: "task type",
                id: task_type.name.clone(),
                detail: "a task type with this name already exists in the project".to_string(),
            });
        }
        self.task_types()
            .insert_one(task_type)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<TaskType>> {
        self.task_types()
            .find_one(doc! {
                "id": id.to_string(),
                "projectId": project_id.to_string(),
            })
            .await
            .map_err(backend_err)
    }

    async fn find_task_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<TaskType>> {
        self.task_types()
            .find_one(doc! {
                "projectId": project_id.to_string(),
                "name": name,
            })
            .await
            .map_err(backend_err)
    }

    async fn update_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        if self
            .task_types()
            .find_one(doc! {
                "projectId": task_type.project_id.to_string(),
                "name": task_type.name.as_str(),
                "id": { "$ne": task_type.id.to_string() },
            })
            .await
            .map_err(backend_err)?
            .is_some()
        {
            return Err(DomainError::Conflict {
                entity: "task type",
                id: task_type.name.clone(),
                detail: "a task type with this name already exists in the project".to_string(),
            });
        }
        let outcome = self
            .task_types()
            .replace_one(doc! { "id": task_type.id.to_string() }, task_type)
            .await
            .map_err(backend_err)?;
        if outcome.matched_count == 0 {
            return Err(DomainError::not_found("task type", task_type.id));
        }
        Ok(())
    }

    async fn list_task_types(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>> {
        let cursor = self
            .task_types()
            .find(doc! { "projectId": project_id.to_string() })
            .await
            .map_err(backend_err)?;
        let mut types: Vec<TaskType> = cursor.try_collect().await.map_err(backend_err)?;
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn delete_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<()> {
        let outcome = self
            .task_types()
            .delete_one(doc! {
                "id": id.to_string(),
                "projectId": project_id.to_string(),
            })
            .await
            .map_err(backend_err)?;
        if outcome.deleted_count == 0 {
            return Err(DomainError::not_found("task type", id));
        }
        Ok(())
    }

    // === Tasks ===

    async fn insert_task(
        &self,
        task: &Task,
        policy: DuplicateHandling,
    ) -> DomainResult<TaskInsertOutcome> {
        self.require_project(task.project_id).await?;
        if policy != DuplicateHandling::Allow {
            let existing = self
                .tasks()
                .find_one(doc! {
                    "projectId": task.project_id.to_string(),
                    "fingerprint": task.fingerprint.as_str(),
                    "status": { "$in": ["queued", "running", "completed"] },
                })
                .await
                .map_err(backend_err)?;
            if let Some(existing) = existing {
                return match policy {
                    DuplicateHandling::Ignore => Ok(TaskInsertOutcome::Duplicate(existing)),
                    DuplicateHandling::Fail => Err(DomainError::DuplicateTask(existing.id)),
                    DuplicateHandling::Allow => unreachable!(),
                };
            }
        }
        self.tasks().insert_one(task).await.map_err(backend_err)?;
        Ok(TaskInsertOutcome::Created(task.clone()))
    }

    async fn get_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<Task>> {
        self.tasks()
            .find_one(doc! {
                "id": id.to_string(),
                "projectId": project_id.to_string(),
            })
            .await
            .map_err(backend_err)
    }

    async fn list_tasks(&self, project_id: Uuid, filter: &TaskFilter) -> DomainResult<TaskPage> {
        self.require_project(project_id).await?;
        let mut tasks: Vec<Task> = self
            .load_project_tasks(project_id)
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(queue_order);
        let total = tasks.len() as u64;
        let page: Vec<Task> = tasks
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        let pagination = PageInfo::new(total, filter.offset, filter.limit, page.len() as u64);
        Ok(TaskPage {
            tasks: page,
            pagination,
        })
    }

    // === Queue operations ===

    async fn acquire_next_task(
        &self,
        project_id: Uuid,
        agent_name: &str,
    ) -> DomainResult<Option<Task>> {
        self.require_project(project_id).await?;
        self.sweep_expired(project_id).await?;

        for _ in 0..CAS_ATTEMPTS {
            let now = Utc::now();
            let tasks = self.load_project_tasks(project_id).await?;

            let held: Vec<&Task> = tasks
                .iter()
                .filter(|t| t.holds_lease(agent_name, now))
                .collect();
            if held.len() == 1 {
                return Ok(Some(held[0].clone()));
            }

            let mut queued: Vec<Task> = tasks
                .into_iter()
                .filter(|t| t.status == TaskStatus::Queued)
                .collect();
            queued.sort_by(queue_order);
            let Some(candidate) = queued.into_iter().next() else {
                return Ok(None);
            };

            let prior_version = candidate.version;
            let mut claimed = candidate;
            claimed.begin_attempt(agent_name, now)?;
            if self
                .replace_task_cas(&claimed, TaskStatus::Queued, prior_version)
                .await?
            {
                return Ok(Some(claimed));
            }
            // Raced by another claimer: re-select.
        }
        Err(DomainError::Backend(
            "claim contention persisted across retries".to_string(),
        ))
    }

    async fn peek_next_task(&self, project_id: Uuid) -> DomainResult<Option<Task>> {
        self.require_project(project_id).await?;
        let mut queued: Vec<Task> = self
            .load_project_tasks(project_id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        queued.sort_by(queue_order);
        Ok(queued.into_iter().next())
    }

    async fn complete_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
    ) -> DomainResult<Task> {
        for _ in 0..CAS_ATTEMPTS {
            let task = self.require_task(project_id, task_id).await?;
            let prior_version = task.version;
            let mut updated = task;
            updated.record_completion(agent_name, result.clone(), Utc::now())?;
            if self
                .replace_task_cas(&updated, TaskStatus::Running, prior_version)
                .await?
            {
                return Ok(updated);
            }
        }
        Err(DomainError::Backend(
            "completion contention persisted across retries".to_string(),
        ))
    }

    async fn fail_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
        can_retry: bool,
    ) -> DomainResult<Task> {
        for _ in 0..CAS_ATTEMPTS {
            let task = self.require_task(project_id, task_id).await?;
            let prior_version = task.version;
            let mut updated = task;
            updated.record_failure(agent_name, result.clone(), can_retry, Utc::now())?;
            if self
                .replace_task_cas(&updated, TaskStatus::Running, prior_version)
                .await?
            {
                return Ok(updated);
            }
        }
        Err(DomainError::Backend(
            "failure contention persisted across retries".to_string(),
        ))
    }

    async fn extend_lease(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        minutes: u32,
    ) -> DomainResult<Task> {
        for _ in 0..CAS_ATTEMPTS {
            let task = self.require_task(project_id, task_id).await?;
            let prior_version = task.version;
            let mut updated = task;
            updated.extend_lease(agent_name, minutes, Utc::now())?;
            if self
                .replace_task_cas(&updated, TaskStatus::Running, prior_version)
                .await?
            {
                return Ok(updated);
            }
        }
        Err(DomainError::Backend(
            "lease extension contention persisted across retries".to_string(),
        ))
    }

    async fn cleanup_expired_leases(&self, project_id: Uuid) -> DomainResult<ReclaimReport> {
        self.require_project(project_id).await?;
        self.sweep_expired(project_id).await
    }

    async fn lease_stats(&self, project_id: Uuid) -> DomainResult<LeaseStats> {
        self.require_project(project_id).await?;
        let now = Utc::now();
        let mut stats = LeaseStats::default();
        for task in self.load_project_tasks(project_id).await? {
            *stats
                .tasks_by_status
                .entry(task.status.as_str().to_string())
                .or_insert(0) += 1;
            if task.status == TaskStatus::Running {
                stats.total_running_tasks += 1;
                if task.lease_expired(now) {
                    stats.expired_tasks += 1;
                }
            }
        }
        Ok(stats)
    }

    // === Derived agent views ===

    async fn list_active_agents(&self, project_id: Uuid) -> DomainResult<Vec<ActiveAgent>> {
        self.require_project(project_id).await?;
        let cursor = self
            .tasks()
            .find(doc! {
                "projectId": project_id.to_string(),
                "status": "running",
            })
            .await
            .map_err(backend_err)?;
        let running: Vec<Task> = cursor.try_collect().await.map_err(backend_err)?;
        let mut agents: Vec<ActiveAgent> = running
            .iter()
            .filter_map(ActiveAgent::from_running_task)
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    // === Sessions ===

    async fn create_session(&self, session: &Session) -> DomainResult<()> {
        self.sessions()
            .insert_one(session)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<Session>> {
        self.sessions()
            .find_one(doc! { "id": id.to_string() })
            .await
            .map_err(backend_err)
    }

    async fn update_session(&self, session: &Session) -> DomainResult<()> {
        let outcome = self
            .sessions()
            .replace_one(doc! { "id": session.id.to_string() }, session)
            .await
            .map_err(backend_err)?;
        if outcome.matched_count == 0 {
            return Err(DomainError::not_found("session", session.id));
        }
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> DomainResult<()> {
        self.sessions()
            .delete_one(doc! { "id": id.to_string() })
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn find_sessions_by_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<Vec<Session>> {
        let cursor = self
            .sessions()
            .find(doc! {
                "agentName": agent_name,
                "projectId": project_id.to_string(),
            })
            .await
            .map_err(backend_err)?;
        let mut sessions: Vec<Session> = cursor.try_collect().await.map_err(backend_err)?;
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn cleanup_expired_sessions(&self) -> DomainResult<u64> {
        let now = Utc::now();
        let cursor = self.sessions().find(doc! {}).await.map_err(backend_err)?;
        let sessions: Vec<Session> = cursor.try_collect().await.map_err(backend_err)?;
        let mut removed = 0;
        for session in sessions {
            if session.is_expired(now) {
                let outcome = self
                    .sessions()
                    .delete_one(doc! { "id": session.id.to_string() })
                    .await
                    .map_err(backend_err)?;
                removed += outcome.deleted_count;
            }
        }
        Ok(removed)
    }

    // === Health ===

    async fn health_check(&self) -> DomainResult<HealthReport> {
        match self.db.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(HealthReport {
                healthy: true,
                message: format!("mongodb database {}", self.db.name()),
            }),
            Err(e) => Ok(HealthReport {
                healthy: false,
                message: format!("mongodb ping failed: {e}"),
            }),
        }
    }
}
