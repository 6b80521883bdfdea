//! Storage backend port.
//!
//! Every backend (filesystem, document store, key/value store) implements
//! this capability contract with identical observable semantics. The four
//! queue operations - claim, complete, fail, extend - must be serializable
//! against all other mutations on the same task; backends provide that with
//! per-project file locks, document predicates, or version-stamp CAS.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ActiveAgent, DuplicateHandling, Project, Session, Task, TaskPage, TaskResult, TaskStatus,
    TaskType,
};

/// Filter and page criteria for task listings.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub type_id: Option<Uuid>,
    pub assigned_to: Option<String>,
    pub batch_id: Option<Uuid>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            type_id: None,
            assigned_to: None,
            batch_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.type_id.is_none_or(|t| task.type_id == t)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|a| task.assigned_to.as_deref() == Some(a))
            && self.batch_id.is_none_or(|b| task.batch_id == Some(b))
    }
}

/// Outcome of a policy-aware task insert.
#[derive(Debug, Clone)]
pub enum TaskInsertOutcome {
    /// The task was persisted.
    Created(Task),
    /// An existing task matched the fingerprint under the `ignore` policy;
    /// it is returned unchanged.
    Duplicate(Task),
}

impl TaskInsertOutcome {
    pub fn into_task(self) -> Task {
        match self {
            Self::Created(task) | Self::Duplicate(task) => task,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

/// Result of one expired-lease sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimReport {
    /// Ids of tasks whose expired leases were reclaimed this sweep.
    pub reclaimed_tasks: Vec<Uuid>,
    /// Agent names that lost their lease this sweep.
    pub cleaned_agents: Vec<String>,
}

/// Read-only lease statistics for a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStats {
    pub total_running_tasks: u64,
    /// Running tasks whose lease has already expired.
    pub expired_tasks: u64,
    pub tasks_by_status: HashMap<String, u64>,
}

/// Backend liveness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub message: String,
}

/// Durable persistence with atomic conditional updates for all entities.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Human-readable backend name (e.g. "file", "mongodb", "redis").
    fn name(&self) -> &'static str;

    // === Projects ===

    async fn create_project(&self, project: &Project) -> DomainResult<()>;

    /// Fetch a project with stats recomputed from current task counts.
    async fn get_project(&self, id: Uuid) -> DomainResult<Option<Project>>;

    /// Name lookup across active AND closed projects.
    async fn find_project_by_name(&self, name: &str) -> DomainResult<Option<Project>>;

    async fn update_project(&self, project: &Project) -> DomainResult<()>;

    async fn list_projects(&self, include_closed: bool) -> DomainResult<Vec<Project>>;

    /// Delete a project and everything under it.
    async fn delete_project(&self, id: Uuid) -> DomainResult<()>;

    // === Task types ===

    async fn create_task_type(&self, task_type: &TaskType) -> DomainResult<()>;

    async fn get_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<TaskType>>;

    async fn find_task_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<TaskType>>;

    async fn update_task_type(&self, task_type: &TaskType) -> DomainResult<()>;

    async fn list_task_types(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>>;

    async fn delete_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<()>;

    // === Tasks ===

    /// Insert a task applying the duplicate policy atomically against the
    /// task's fingerprint. `Allow` always creates; `Ignore` returns the
    /// matching queued/running/completed task unchanged; `Fail` raises
    /// `DuplicateTask`.
    async fn insert_task(
        &self,
        task: &Task,
        policy: DuplicateHandling,
    ) -> DomainResult<TaskInsertOutcome>;

    async fn get_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<Task>>;

    async fn list_tasks(&self, project_id: Uuid, filter: &TaskFilter) -> DomainResult<TaskPage>;

    // === Queue operations (serializable per task) ===

    /// The critical atomic primitive: reclaim expired leases, resume the
    /// caller's own valid lease if any, else dispatch the oldest queued task
    /// (FIFO by creation time, ties broken by id) to `agent_name`.
    async fn acquire_next_task(
        &self,
        project_id: Uuid,
        agent_name: &str,
    ) -> DomainResult<Option<Task>>;

    /// Non-mutating view of what dispatch would return next.
    async fn peek_next_task(&self, project_id: Uuid) -> DomainResult<Option<Task>>;

    /// Atomic `running -> completed`, asserting `assigned_to == agent_name`.
    async fn complete_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
    ) -> DomainResult<Task>;

    /// Atomic `running -> queued` (retriable under budget) or
    /// `running -> failed`, asserting `assigned_to == agent_name`.
    async fn fail_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
        can_retry: bool,
    ) -> DomainResult<Task>;

    /// Atomic lease extension; rejects when the task is not running or is
    /// owned by another agent.
    async fn extend_lease(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        minutes: u32,
    ) -> DomainResult<Task>;

    /// Reclaim every expired lease in the project. Idempotent; concurrent
    /// sweeps never double-reclaim a task.
    async fn cleanup_expired_leases(&self, project_id: Uuid) -> DomainResult<ReclaimReport>;

    /// Pure read of lease statistics.
    async fn lease_stats(&self, project_id: Uuid) -> DomainResult<LeaseStats>;

    // === Derived agent views ===

    async fn list_active_agents(&self, project_id: Uuid) -> DomainResult<Vec<ActiveAgent>>;

    // === Sessions (single-record writes; never take a project lock) ===

    async fn create_session(&self, session: &Session) -> DomainResult<()>;

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<Session>>;

    async fn update_session(&self, session: &Session) -> DomainResult<()>;

    async fn delete_session(&self, id: Uuid) -> DomainResult<()>;

    async fn find_sessions_by_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<Vec<Session>>;

    /// Delete every expired session; returns how many were removed.
    async fn cleanup_expired_sessions(&self) -> DomainResult<u64>;

    // === Health ===

    async fn health_check(&self) -> DomainResult<HealthReport>;
}
