//! Domain errors for the Foreman orchestration service.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors raised by services and storage backends.
///
/// Surface adapters translate these into their native error shapes
/// (HTTP status codes, RPC `isError` payloads, CLI exit codes).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("duplicate task: matches existing task {0}")]
    DuplicateTask(Uuid),

    #[error("conflict on {entity} {id}: {detail}")]
    Conflict {
        entity: &'static str,
        id: String,
        detail: String,
    },

    #[error("project {0} is closed")]
    ProjectClosed(String),

    #[error("task {task_id} is not assigned to agent {agent_name}")]
    NotAssigned { task_id: Uuid, agent_name: String },

    #[error("lease expired for task {0}")]
    LeaseExpired(Uuid),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("storage backend unavailable: {0}")]
    Backend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the caller may usefully retry the same operation.
    ///
    /// Only backend-transient failures (lock timeouts, connection drops)
    /// qualify; application errors are never retried on the caller's behalf.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Internal(format!("serialization error: {err}"))
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Backend(err.to_string())
    }
}
