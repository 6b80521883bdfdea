//! Redis storage backend.
//!
//! Entities are JSON strings under namespaced keys with set-based indexes
//! per project. The atomic queue operations use a per-task version stamp
//! checked and advanced by a Lua script, retried from selection when
//! another instance wins the race.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::page::PageInfo;
use crate::domain::models::{
    ActiveAgent, DuplicateHandling, Project, ProjectStats, Session, Task, TaskPage, TaskResult,
    TaskStatus, TaskType,
};
use crate::domain::ports::storage::{
    HealthReport, LeaseStats, ReclaimReport, StorageBackend, TaskFilter, TaskInsertOutcome,
};

const CAS_ATTEMPTS: usize = 5;

/// Compare-and-swap a task document against its version stamp.
///
/// KEYS[1] task json, KEYS[2] version stamp.
/// ARGV[1] expected version, ARGV[2] new json, ARGV[3] new version.
const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[2])
if current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  redis.call('SET', KEYS[2], ARGV[3])
  return 1
else
  return 0
end
";

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

fn backend_err(e: redis::RedisError) -> DomainError {
    DomainError::Backend(format!("redis: {e}"))
}

fn to_json<T: serde::Serialize>(value: &T) -> DomainResult<String> {
    serde_json::to_string(value).map_err(Into::into)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> DomainResult<T> {
    serde_json::from_str(raw).map_err(|e| DomainError::Backend(format!("corrupt record: {e}")))
}

fn k_projects() -> String {
    "foreman:projects".to_string()
}

fn k_project(id: Uuid) -> String {
    format!("foreman:project:{id}")
}

fn k_project_name(name: &str) -> String {
    format!("foreman:project:name:{name}")
}

fn k_types_index(project_id: Uuid) -> String {
    format!("foreman:project:{project_id}:tasktypes")
}

fn k_type(project_id: Uuid, id: Uuid) -> String {
    format!("foreman:tasktype:{project_id}:{id}")
}

fn k_tasks_index(project_id: Uuid) -> String {
    format!("foreman:project:{project_id}:tasks")
}

fn k_task(project_id: Uuid, id: Uuid) -> String {
    format!("foreman:task:{project_id}:{id}")
}

fn k_task_ver(project_id: Uuid, id: Uuid) -> String {
    format!("foreman:task:{project_id}:{id}:ver")
}

fn k_sessions() -> String {
    "foreman:sessions".to_string()
}

fn k_session(id: Uuid) -> String {
    format!("foreman:session:{id}")
}

fn queue_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

impl RedisBackend {
    pub async fn connect(uri: &str) -> DomainResult<Self> {
        let client = redis::Client::open(uri).map_err(backend_err)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_err)?;
        Ok(Self { conn })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: String,
    ) -> DomainResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(backend_err)?;
        raw.as_deref().map(from_json).transpose()
    }

    async fn require_project(&self, project_id: Uuid) -> DomainResult<Project> {
        self.get_json(k_project(project_id))
            .await?
            .ok_or_else(|| DomainError::not_found("project", project_id))
    }

    async fn load_project_tasks(&self, project_id: Uuid) -> DomainResult<Vec<Task>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(k_tasks_index(project_id))
            .await
            .map_err(backend_err)?;
        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(task_id) = id.parse::<Uuid>() else {
                continue;
            };
            if let Some(task) = self.get_json::<Task>(k_task(project_id, task_id)).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn compute_stats(&self, project_id: Uuid) -> DomainResult<ProjectStats> {
        let tasks = self.load_project_tasks(project_id).await?;
        let mut stats = ProjectStats {
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

    /// CAS-replace a task document. Returns false when the version stamp no
    /// longer matches (another instance won).
    async fn replace_task_cas(&self, task: &Task, expected_version: u64) -> DomainResult<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 = redis::Script::new(CAS_SCRIPT)
            .key(k_task(task.project_id, task.id))
            .key(k_task_ver(task.project_id, task.id))
            .arg(expected_version.to_string())
            .arg(to_json(task)?)
            .arg(task.version.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(swapped == 1)
    }

    async fn store_new_task(&self, task: &Task) -> DomainResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(k_task(task.project_id, task.id), to_json(task)?)
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .set(k_task_ver(task.project_id, task.id), task.version.to_string())
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .sadd(k_tasks_index(task.project_id), task.id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn sweep_expired(&self, project_id: Uuid) -> DomainResult<ReclaimReport> {
        let now = Utc::now();
        let mut report = ReclaimReport::default();
        for task in self.load_project_tasks(project_id).await? {
            if !task.lease_expired(now) {
                continue;
            }
            let prior_version = task.version;
            let mut reclaimed = task;
            let agent = reclaimed.assigned_to.clone();
            reclaimed.record_timeout(now)?;
            if self.replace_task_cas(&reclaimed, prior_version).await? {
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
        self.get_json(k_task(project_id, task_id))
            .await?
            .ok_or_else(|| DomainError::not_found("task", task_id))
    }

    /// Shared retry loop for the running-task transitions.
    async fn mutate_running_task<F>(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        describe: &str,
        mutate: F,
    ) -> DomainResult<Task>
    where
        F: Fn(&mut Task) -> DomainResult<()>,
    {
        for _ in 0..CAS_ATTEMPTS {
            let task = self.require_task(project_id, task_id).await?;
            let prior_version = task.version;
            let mut updated = task;
            mutate(&mut updated)?;
            if self.replace_task_cas(&updated, prior_version).await? {
                return Ok(updated);
            }
        }
        Err(DomainError::Backend(format!(
            "{describe} contention persisted across retries"
        )))
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    // === Projects ===

    async fn create_project(&self, project: &Project) -> DomainResult<()> {
        let mut conn = self.conn.clone();
        let reserved: bool = conn
            .set_nx(k_project_name(&project.name), project.id.to_string())
            .await
            .map_err(backend_err)?;
        if !reserved {
            return Err(DomainError::Conflict {
                entity: "project",
                id: project.name.clone(),
                detail: "a project with this name already exists".to_string(),
            });
        }
        let _: () = conn
            .set(k_project(project.id), to_json(project)?)
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .sadd(k_projects(), project.id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> DomainResult<Option<Project>> {
        let Some(mut project) = self.get_json::<Project>(k_project(id)).await? else {
            return Ok(None);
        };
        project.stats = self.compute_stats(id).await?;
        Ok(Some(project))
    }

    async fn find_project_by_name(&self, name: &str) -> DomainResult<Option<Project>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn
            .get(k_project_name(name))
            .await
            .map_err(backend_err)?;
        match id.and_then(|raw| raw.parse::<Uuid>().ok()) {
            Some(id) => self.get_project(id).await,
            None => Ok(None),
        }
    }

    async fn update_project(&self, project: &Project) -> DomainResult<()> {
        let existing = self.require_project(project.id).await?;
        let mut conn = self.conn.clone();
        if existing.name != project.name {
            let reserved: bool = conn
                .set_nx(k_project_name(&project.name), project.id.to_string())
                .await
                .map_err(backend_err)?;
            if !reserved {
                return Err(DomainError::Conflict {
                    entity: "project",
                    id: project.name.clone(),
                    detail: "a project with this name already exists".to_string(),
                });
            }
            let _: () = conn
                .del(k_project_name(&existing.name))
                .await
                .map_err(backend_err)?;
        }
        let _: () = conn
            .set(k_project(project.id), to_json(project)?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_projects(&self, include_closed: bool) -> DomainResult<Vec<Project>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(k_projects()).await.map_err(backend_err)?;
        let mut projects = Vec::new();
        for id in ids {
            let Ok(project_id) = id.parse::<Uuid>() else {
                continue;
            };
            if let Some(project) = self.get_project(project_id).await? {
                if include_closed || project.is_active() {
                    projects.push(project);
                }
            }
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn delete_project(&self, id: Uuid) -> DomainResult<()> {
        let project = self.require_project(id).await?;
        let mut conn = self.conn.clone();

        let type_ids: Vec<String> = conn
            .smembers(k_types_index(id))
            .await
            .map_err(backend_err)?;
        for raw in type_ids {
            if let Ok(type_id) = raw.parse::<Uuid>() {
                let _: () = conn.del(k_type(id, type_id)).await.map_err(backend_err)?;
            }
        }
        let task_ids: Vec<String> = conn
            .smembers(k_tasks_index(id))
            .await
            .map_err(backend_err)?;
        for raw in task_ids {
            if let Ok(task_id) = raw.parse::<Uuid>() {
                let _: () = conn.del(k_task(id, task_id)).await.map_err(backend_err)?;
                let _: () = conn
                    .del(k_task_ver(id, task_id))
                    .await
                    .map_err(backend_err)?;
            }
        }
        let _: () = conn.del(k_types_index(id)).await.map_err(backend_err)?;
        let _: () = conn.del(k_tasks_index(id)).await.map_err(backend_err)?;
        let _: () = conn
            .del(k_project_name(&project.name))
            .await
            .map_err(backend_err)?;
        let _: () = conn.del(k_project(id)).await.map_err(backend_err)?;
        let _: () = conn
            .srem(k_projects(), id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    // === Task types ===

    async fn create_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        self.require_project(task_type.project_id).await?;
        if self
            .find_task_type_by_name(task_type.project_id, &task_type.name)
            .await?
            .is_some()
        {
            return Err(DomainError::Conflict {
                entity: "task type",
                id: task_type.name.clone(),
                detail: "a task type with this name already exists in the project".to_string(),
            });
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(
                k_type(task_type.project_id, task_type.id),
                to_json(task_type)?,
            )
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .sadd(k_types_index(task_type.project_id), task_type.id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<TaskType>> {
        self.get_json(k_type(project_id, id)).await
    }

    async fn find_task_type_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> DomainResult<Option<TaskType>> {
        Ok(self
            .list_task_types(project_id)
            .await?
            .into_iter()
            .find(|t| t.name == name))
    }

    async fn update_task_type(&self, task_type: &TaskType) -> DomainResult<()> {
        if self
            .get_task_type(task_type.project_id, task_type.id)
            .await?
            .is_none()
        {
            return Err(DomainError::not_found("task type", task_type.id));
        }
        let clash = self
            .find_task_type_by_name(task_type.project_id, &task_type.name)
            .await?
            .is_some_and(|t| t.id != task_type.id);
        if clash {
            return Err(DomainError::Conflict {
                entity: "task type",
                id: task_type.name.clone(),
                detail: "a task type with this name already exists in the project".to_string(),
            });
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(
                k_type(task_type.project_id, task_type.id),
                to_json(task_type)?,
            )
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn list_task_types(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(k_types_index(project_id))
            .await
            .map_err(backend_err)?;
        let mut types = Vec::new();
        for raw in ids {
            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };
            if let Some(task_type) = self.get_json::<TaskType>(k_type(project_id, id)).await? {
                types.push(task_type);
            }
        }
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn delete_task_type(&self, project_id: Uuid, id: Uuid) -> DomainResult<()> {
        if self.get_task_type(project_id, id).await?.is_none() {
            return Err(DomainError::not_found("task type", id));
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(k_type(project_id, id)).await.map_err(backend_err)?;
        let _: () = conn
            .srem(k_types_index(project_id), id.to_string())
            .await
            .map_err(backend_err)?;
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
                .load_project_tasks(task.project_id)
                .await?
                .into_iter()
                .find(|t| {
                    t.fingerprint == task.fingerprint
                        && matches!(
                            t.status,
                            TaskStatus::Queued | TaskStatus::Running | TaskStatus::Completed
                        )
                });
            if let Some(existing) = existing {
                return match policy {
                    DuplicateHandling::Ignore => Ok(TaskInsertOutcome::Duplicate(existing)),
                    DuplicateHandling::Fail => Err(DomainError::DuplicateTask(existing.id)),
                    DuplicateHandling::Allow => unreachable!(),
                };
            }
        }
        self.store_new_task(task).await?;
        Ok(TaskInsertOutcome::Created(task.clone()))
    }

    async fn get_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<Task>> {
        self.get_json(k_task(project_id, id)).await
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
            if self.replace_task_cas(&claimed, prior_version).await? {
                return Ok(Some(claimed));
            }
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
        let agent_name = agent_name.to_string();
        self.mutate_running_task(project_id, task_id, "completion", move |task| {
            task.record_completion(&agent_name, result.clone(), Utc::now())
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
        self.mutate_running_task(project_id, task_id, "failure", move |task| {
            task.record_failure(&agent_name, result.clone(), can_retry, Utc::now())
                .map(|_| ())
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
        self.mutate_running_task(project_id, task_id, "lease extension", move |task| {
            task.extend_lease(&agent_name, minutes, Utc::now()).map(|_| ())
        })
        .await
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
        let mut agents: Vec<ActiveAgent> = self
            .load_project_tasks(project_id)
            .await?
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .filter_map(ActiveAgent::from_running_task)
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    // === Sessions ===

    async fn create_session(&self, session: &Session) -> DomainResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(k_session(session.id), to_json(session)?)
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .sadd(k_sessions(), session.id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> DomainResult<Option<Session>> {
        self.get_json(k_session(id)).await
    }

    async fn update_session(&self, session: &Session) -> DomainResult<()> {
        if self.get_session(session.id).await?.is_none() {
            return Err(DomainError::not_found("session", session.id));
        }
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(k_session(session.id), to_json(session)?)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> DomainResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(k_session(id)).await.map_err(backend_err)?;
        let _: () = conn
            .srem(k_sessions(), id.to_string())
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn find_sessions_by_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<Vec<Session>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(k_sessions()).await.map_err(backend_err)?;
        let mut sessions = Vec::new();
        for raw in ids {
            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };
            if let Some(session) = self.get_session(id).await? {
                if session.agent_name == agent_name && session.project_id == project_id {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    async fn cleanup_expired_sessions(&self) -> DomainResult<u64> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(k_sessions()).await.map_err(backend_err)?;
        let now = Utc::now();
        let mut removed = 0;
        for raw in ids {
            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };
            if let Some(session) = self.get_session(id).await? {
                if session.is_expired(now) {
                    self.delete_session(id).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    // === Health ===

    async fn health_check(&self) -> DomainResult<HealthReport> {
        let mut conn = self.conn.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Ok(HealthReport {
                healthy: true,
                message: "redis storage".to_string(),
            }),
            Err(e) => Ok(HealthReport {
                healthy: false,
                message: format!("redis ping failed: {e}"),
            }),
        }
    }
}
