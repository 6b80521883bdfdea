//! Ephemeral agent view.
//!
//! Agents are not stored as first-class entities. An "active agent" is
//! derived from task state: one record per task currently running under a
//! lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived view of an agent currently holding a task lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAgent {
    pub name: String,
    /// Always "working": an agent only exists while it holds a lease.
    pub status: String,
    pub current_task_id: Uuid,
    pub lease_expires_at: DateTime<Utc>,
    pub project_id: Uuid,
}

impl ActiveAgent {
    pub fn from_running_task(task: &crate::domain::models::Task) -> Option<Self> {
        let name = task.assigned_to.clone()?;
        let lease_expires_at = task.lease_expires_at?;
        Some(Self {
            name,
            status: "working".to_string(),
            current_task_id: task.id,
            lease_expires_at,
            project_id: task.project_id,
        })
    }
}
