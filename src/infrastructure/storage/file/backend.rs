//! Filesystem storage backend.
//!
//! All atomic queue operations run inside a per-project exclusive advisory
//! file lock, so they are serializable against every other mutation on the
//! same project, including from other processes sharing the data directory.
//! Project create/rename/delete additionally serialize on a registry lock
//! that guards name uniqueness. Session writes are single-file and take no
//! lock.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActiveAgent, DuplicateHandling, Project, Session, Task, TaskPage, TaskResult, TaskStatus,
    TaskType,
};
use crate::domain::models::page::PageInfo;
use crate::domain::ports::storage::{
    HealthReport, LeaseStats, ReclaimReport, StorageBackend, TaskFilter, TaskInsertOutcome,
};

use super::lock::FileLock;
use super::store::FsStore;

#[derive(Debug, Clone)]
pub struct FileBackend {
    store: FsStore,
    lock_timeout: Duration,
}

impl FileBackend {
    pub fn new(data_dir: impl Into<PathBuf>, lock_timeout: Duration) -> DomainResult<Self> {
        let store = FsStore::new(data_dir);
        std::fs::create_dir_all(store.projects_dir())?;
        std::fs::create_dir_all(store.sessions_dir())?;
        std::fs::create_dir_all(store.root().join("locks"))?;
        Ok(Self {
            store,
            lock_timeout,
        })
    }

    /// Run a blocking section without any lock (reads).
    async fn run<T, F>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce(FsStore) -> DomainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| DomainError::Internal(format!("storage task panicked: {e}")))?
    }

    /// Run a blocking section while holding the given lock file.
    async fn locked<T, F>(&self, lock_path: PathBuf, f: F) -> DomainResult<T>
    where
        F: FnOnce(FsStore) -> DomainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || {
            let _guard = FileLock::acquire(&lock_path, timeout)?;
            f(store)
        })
        .await
        .map_err(|e| DomainError::Internal(format!("storage task panicked: {e}")))?
    }

    async fn project_locked<T, F>(&self, project_id: Uuid, f: F) -> DomainResult<T>
    where
        F: FnOnce(FsStore) -> DomainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.locked(self.store.lock_file(project_id), f).await
    }
}

/// FIFO dispatch order: creation time ascending, ties broken by id.
fn queue_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Reclaim every expired lease in the project. Must run under the project
/// lock.
fn sweep_expired(store: &FsStore, project_id: Uuid) -> DomainResult<ReclaimReport> {
    let now = Utc::now();
    let mut report = ReclaimReport::default();
    for mut task in store.load_tasks(project_id)? {
        if task.lease_expired(now) {
            let agent = task.assigned_to.clone();
            task.record_timeout(now)?;
            store.save_task(&task)?;
            report.reclaimed_tasks.push(task.id);
            if let Some(agent) = agent {
                if !report.cleaned_agents.contains(&agent) {
                    report.cleaned_agents.push(agent);
                }
            }
        }
    }
    Ok(report)
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    // === Projects ===

    async fn create_project(&self, project: &Project) -> DomainResult<()> {
        let project = project.clone();
        let lock_path = self.store.registry_lock_file();
        self.locked(lock_path, move |store| {
            let existing = store.load_all_projects()?;
            if existing.iter().any(|p| p.name == project.name) {
                return Err(DomainError::Conflict {
                    entity: "project",
                    id: project.name.clone(),
                    detail: "a project with this name already exists".to_string(),
                });
            }
            store.write_json(&store.project_file(project.id), &project)?;
            std::fs::create_dir_all(store.task_types_dir(project.id))?;
            std::fs::create_dir_all(store.tasks_dir(project.id))?;
            Ok(())
        })
        .await
    }

    async fn get_project(&self, id: Uuid) -> DomainResult<Option<Project>> {
        self.run(move |store| {
            let Some(mut project) = store.load_project(id)? else {
                return Ok(None);
            };
            project.stats = store.compute_stats(id)?;
            Ok(Some(project))
        })
        .await
    }

    async fn find_project_by_name(&self, name: &str) -> DomainResult<Option<Project>> {
        let name = name.to_string();
        self.run(move |store| {
            for mut project in store.load_all_projects()? {
                if project.name == name {
                    project.stats = store.compute_stats(project.id)?;
                    return Ok(Some(project));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn update_project(&self, project: &Project) -> DomainResult<()> {
        let project = project.clone();
        let lock_path = self.store.registry_lock_file();
        self.locked(lock_path, move |store| {
            store.require_project(project.id)?;
            let existing = store.load_all_projects()?;
            if existing
                .iter()
                .any(|p| p.name == project.name && p.id != project.id)
            {
                return Err(DomainError::Conflict {
                    entity: "project",
                    id: project.name.clone(),
                    detail: "a project with this name already exists".to_string(),
                });
            }
            store.write_json(&store.project_file(project.id), &project)
        })
        .await
    }

    async fn list_projects(&self, include_closed: bool) -> DomainResult<Vec<Project>> {
        self.run(move |store| {
            let mut projects = store.load_all_projects()?;
            projects.retain(|p| include_closed || p.is_active());
            for project in &mut projects {
                project.stats = store.compute_stats(project.id)?;
            }
            projects.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(projects)
        })
        .await
    }

    async fn delete_project(&self, id: Uuid) -> DomainResult<()> {
        let registry_lock = self.store.registry_lock_file();
        let project_lock = self.store.lock_file(id);
        let timeout = self.lock_timeout;
        self.locked(registry_lock, move |store| {
            let _project_guard = FileLock::acquire(&project_lock, timeout)?;
            store.require_project(id)?;
            std::fs::remove_dir_all(store.project_dir(id))?;
            Ok(())
        })
        .await
    }

    // === Task types ===

    async fn create_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        let task_type = task_type.clone();
        self.project_locked(task_type.project_id, move |store| {
            store.require_project(task_type.project_id)?;
            let existing = store.load_task_types(task_type.project_id)?;
            if existing.iter().any(|t| t.name == task_type.name) {
                return Err(DomainError::Conflict {
                    entity: "task type",
                    id: task_type.name.clone(),
                    detail: "a task type with this name already exists in the project"
                        .to_string(),
                });
            }
            store.write_json(
                &store.task_type_file(task_type.project_id, task_type.id),
                &task_type,
            )
        })
        .await
    }

    async fn get_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<TaskType>> {
        self.run(move |store| store.read_json(&store.task_type_file(project_id, id)))
            .await
    }

    async fn find_task_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<TaskType>> {
        let name = name.to_string();
        self.run(move |store| {
            Ok(store
                .load_task_types(project_id)?
                .into_iter()
                .find(|t| t.name == name))
        })
        .await
    }

    async fn update_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        let task_type = task_type.clone();
        self.project_locked(task_type.project_id, move |store| {
            let path = store.task_type_file(task_type.project_id, task_type.id);
            if store.read_json::<TaskType>(&path)?.is_none() {
                return Err(DomainError::not_found("task type", task_type.id));
            }
            let existing = store.load_task_types(task_type.project_id)?;
            if existing
                .iter()
                .any(|t| t.name == task_type.name && t.id != task_type.id)
            {
                return Err(DomainError::Conflict {
                    entity: "task type",
                    id: task_type.name.clone(),
                    detail: "a task type with this name already exists in the project"
                        .to_string(),
                });
            }
            store.write_json(&path, &task_type)
        })
        .await
    }

    async fn list_task_types(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>> {
        self.run(move |store| {
            let mut types = store.load_task_types(project_id)?;
            types.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(types)
        })
        .await
    }

    async fn delete_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<()> {
        self.project_locked(project_id, move |store| {
            if !store.remove(&store.task_type_file(project_id, id))? {
                return Err(DomainError::not_found("task type", id));
            }
            Ok(())
        })
        .await
    }

    // === Tasks ===

    async fn insert_task(
        &self,
        task: &Task,
        policy: DuplicateHandling,
    ) -> DomainResult<TaskInsertOutcome> {
        let task = task.clone();
        self.project_locked(task.project_id, move |store| {
            store.require_project(task.project_id)?;
            if policy != DuplicateHandling::Allow {
                let dup = store.load_tasks(task.project_id)?.into_iter().find(|t| {
                    t.fingerprint == task.fingerprint
                        && matches!(
                            t.status,
                            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Completed
                        )
                });
                if let Some(existing) = dup {
                    return match policy {
                        DuplicateHandling::Ignore => Ok(TaskInsertOutcome::Duplicate(existing)),
                        DuplicateHandling::Fail => Err(DomainError::DuplicateTask(existing.id)),
                        DuplicateHandling::Allow => unreachable!(),
                    };
                }
            }
            if store.load_task(task.project_id, task.id)?.is_some() {
                return Err(DomainError::Conflict {
                    entity: "task",
                    id: task.id.to_string(),
                    detail: "a task with this id already exists".to_string(),
                });
            }
            store.save_task(&task)?;
            Ok(TaskInsertOutcome::Created(task))
        })
        .await
    }

    async fn get_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<Task>> {
        self.run(move |store| store.load_task(project_id, id)).await
    }

    async fn list_tasks(&self, project_id: Uuid, filter: &TaskFilter) -> DomainResult<TaskPage> {
        let filter = filter.clone();
        self.run(move |store| {
            store.require_project(project_id)?;
            let mut tasks: Vec<Task> = store
                .load_tasks(project_id)?
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
        })
        .await
    }

    // === Queue operations ===

    async fn acquire_next_task(
        &self,
        project_id: Uuid,
        agent_name: &str,
    ) -> DomainResult<Option<Task>> {
        let agent_name = agent_name.to_string();
        self.project_locked(project_id, move |store| {
            store.require_project(project_id)?;
            sweep_expired(&store, project_id)?;

            let now = Utc::now();
            let tasks = store.load_tasks(project_id)?;

            // Resume: the agent already holds exactly one valid lease.
            let mut held: Vec<&Task> = tasks
                .iter()
                .filter(|t| t.holds_lease(&agent_name, now))
                .collect();
            if held.len() == 1 {
                return Ok(Some(held.remove(0).clone()));
            }

            // Dispatch the oldest queued task.
            let mut queued: Vec<Task> = tasks
                .into_iter()
                .filter(|t| t.status == TaskStatus::Queued)
                .collect();
            queued.sort_by(queue_order);
            let Some(mut task) = queued.into_iter().next() else {
                return Ok(None);
            };
            task.begin_attempt(&agent_name, now)?;
            store.save_task(&task)?;
            Ok(Some(task))
        })
        .await
    }

    async fn peek_next_task(&self, project_id: Uuid) -> DomainResult<Option<Task>> {
        self.run(move |store| {
            store.require_project(project_id)?;
            let mut queued: Vec<Task> = store
                .load_tasks(project_id)?
                .into_iter()
                .filter(|t| t.status == TaskStatus::Queued)
                .collect();
            queued.sort_by(queue_order);
            Ok(queued.into_iter().next())
        })
        .await
    }

    async fn complete_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
    ) -> DomainResult<Task> {
        let agent_name = agent_name.to_string();
        self.project_locked(project_id, move |store| {
            let mut task = store.require_task(project_id, task_id)?;
            task.record_completion(&agent_name, result, Utc::now())?;
            store.save_task(&task)?;
            Ok(task)
        })
        .await
    }

    async fn fail_task(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        result: TaskResult,
        can_retry: bool,
    ) -> DomainResult<Task> {
        let agent_name = agent_name.to_string();
        self.project_locked(project_id, move |store| {
            let mut task = store.require_task(project_id, task_id)?;
            task.record_failure(&agent_name, result, can_retry, Utc::now())?;
            store.save_task(&task)?;
            Ok(task)
        })
        .await
    }

    async fn extend_lease(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_name: &str,
        minutes: u32,
    ) -> DomainResult<Task> {
        let agent_name = agent_name.to_string();
        self.project_locked(project_id, move |store| {
            let mut task = store.require_task(project_id, task_id)?;
            task.extend_lease(&agent_name, minutes, Utc::now())?;
            store.save_task(&task)?;
            Ok(task)
        })
        .await
    }

    async fn cleanup_expired_leases(&self, project_id: Uuid) -> DomainResult<ReclaimReport> {
        self.project_locked(project_id, move |store| {
            store.require_project(project_id)?;
            sweep_expired(&store, project_id)
        })
        .await
    }

    async fn lease_stats(&self, project_id: Uuid) -> DomainResult<LeaseStats> {
        self.run(move |store| {
            store.require_project(project_id)?;
            let now = Utc::now();
            let mut stats = LeaseStats::default();
            for task in store.load_tasks(project_id)? {
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
        })
        .await
    }

    // === Derived agent views ===

    async fn list_active_agents(&self, project_id: Uuid) -> DomainResult<Vec<ActiveAgent>> {
        self.run(move |store| {
            store.require_project(project_id)?;
            let mut agents: Vec<ActiveAgent> = store
                .load_tasks(project_id)?
                .iter()
                .filter(|t| t.status == TaskStatus::Running)
                .filter_map(ActiveAgent::from_running_task)
                .collect();
            agents.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(agents)
        })
        .await
    }

    // === Sessions ===

    async fn create_session(&self, session: &Session) -> DomainResult<()> {
        let session = session.clone();
        self.run(move |store| store.write_json(&store.session_file(session.id), &session))
            .await
    }

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<Session>> {
        self.run(move |store| store.read_json(&store.session_file(id)))
            .await
    }

    async fn update_session(&self, session: &Session) -> DomainResult<()> {
        let session = session.clone();
        self.run(move |store| {
            let path = store.session_file(session.id);
            if store.read_json::<Session>(&path)?.is_none() {
                return Err(DomainError::not_found("session", session.id));
            }
            store.write_json(&path, &session)
        })
        .await
    }

    async fn delete_session(&self, id: Uuid) -> DomainResult<()> {
        self.run(move |store| {
            store.remove(&store.session_file(id))?;
            Ok(())
        })
        .await
    }

    async fn find_sessions_by_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<Vec<Session>> {
        let agent_name = agent_name.to_string();
        self.run(move |store| {
            let mut sessions: Vec<Session> = store
                .load_sessions()?
                .into_iter()
                .filter(|s| s.agent_name == agent_name && s.project_id == project_id)
                .collect();
            sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
            Ok(sessions)
        })
        .await
    }

    async fn cleanup_expired_sessions(&self) -> DomainResult<u64> {
        self.run(move |store| {
            let now = Utc::now();
            let mut removed = 0;
            for session in store.load_sessions()? {
                if session.is_expired(now) && store.remove(&store.session_file(session.id))? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
    }

    // === Health ===

    async fn health_check(&self) -> DomainResult<HealthReport> {
        self.run(move |store| {
            let writable = std::fs::metadata(store.root())
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false);
            Ok(HealthReport {
                healthy: writable,
                message: if writable {
                    format!("file storage at {}", store.root().display())
                } else {
                    format!("data directory {} is not writable", store.root().display())
                },
            })
        })
        .await
    }
}
