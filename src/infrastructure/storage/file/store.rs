//! Synchronous JSON-file store used by the filesystem backend.
//!
//! On-disk layout:
//!
//! ```text
//! <dataDir>/
//!   projects/<projectId>/project.json
//!   projects/<projectId>/tasktypes/<id>.json
//!   projects/<projectId>/tasks/<id>.json
//!   sessions/<id>.json
//!   locks/<projectId>.lock
//! ```
//!
//! Files are UTF-8 JSON with ISO-8601 dates. Writes go through a temp file
//! and rename so readers never observe a torn document.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Project, ProjectStats, Session, Task, TaskStatus, TaskType};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.projects_dir().join(project_id.to_string())
    }

    pub fn project_file(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join("project.json")
    }

    pub fn task_types_dir(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join("tasktypes")
    }

    pub fn task_type_file(&self, project_id: Uuid, id: Uuid) -> PathBuf {
        self.task_types_dir(project_id).join(format!("{id}.json"))
    }

    pub fn tasks_dir(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join("tasks")
    }

    pub fn task_file(&self, project_id: Uuid, id: Uuid) -> PathBuf {
        self.tasks_dir(project_id).join(format!("{id}.json"))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn session_file(&self, id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{id}.json"))
    }

    pub fn lock_file(&self, project_id: Uuid) -> PathBuf {
        self.root.join("locks").join(format!("{project_id}.lock"))
    }

    /// Lock guarding project create/rename/delete (name uniqueness).
    pub fn registry_lock_file(&self) -> PathBuf {
        self.root.join("locks").join("registry.lock")
    }

    // === Generic JSON I/O ===

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> DomainResult<Option<T>> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    DomainError::Backend(format!("corrupt record {}: {e}", path.display()))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> DomainResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> DomainResult<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_dir_json<T: DeserializeOwned>(&self, dir: &Path) -> DomainResult<Vec<T>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(value) = self.read_json(&path)? {
                    out.push(value);
                }
            }
        }
        Ok(out)
    }

    // === Entity helpers ===

    pub fn load_project(&self, project_id: Uuid) -> DomainResult<Option<Project>> {
        self.read_json(&self.project_file(project_id))
    }

    pub fn require_project(&self, project_id: Uuid) -> DomainResult<Project> {
        self.load_project(project_id)?
            .ok_or_else(|| DomainError::not_found("project", project_id))
    }

    pub fn load_all_projects(&self) -> DomainResult<Vec<Project>> {
        let mut projects = Vec::new();
        let entries = match std::fs::read_dir(self.projects_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(projects),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let dir = entry?.path();
            if dir.is_dir() {
                if let Some(project) = self.read_json(&dir.join("project.json"))? {
                    projects.push(project);
                }
            }
        }
        Ok(projects)
    }

    pub fn load_tasks(&self, project_id: Uuid) -> DomainResult<Vec<Task>> {
        self.read_dir_json(&self.tasks_dir(project_id))
    }

    pub fn load_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Option<Task>> {
        self.read_json(&self.task_file(project_id, id))
    }

    pub fn require_task(&self, project_id: Uuid, id: Uuid) -> DomainResult<Task> {
        self.load_task(project_id, id)?
            .ok_or_else(|| DomainError::not_found("task", id))
    }

    pub fn save_task(&self, task: &Task) -> DomainResult<()> {
        self.write_json(&self.task_file(task.project_id, task.id), task)
    }

    pub fn load_task_types(&self, project_id: Uuid) -> DomainResult<Vec<TaskType>> {
        self.read_dir_json(&self.task_types_dir(project_id))
    }

    pub fn load_sessions(&self) -> DomainResult<Vec<Session>> {
        self.read_dir_json(&self.sessions_dir())
    }

    /// Recompute project stats by scanning task records.
    pub fn compute_stats(&self, project_id: Uuid) -> DomainResult<ProjectStats> {
        let tasks = self.load_tasks(project_id)?;
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
}
