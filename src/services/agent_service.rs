//! Ephemeral agent operations.
//!
//! Agents are never persisted: an agent "exists" only as the label on the
//! current lease of a running task. This service derives agent views from
//! task state and mints names for anonymous claimers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::instrument;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::ActiveAgent;
use crate::domain::ports::StorageBackend;

static NAME_COUNTER: OnceLock<AtomicU64> = OnceLock::new();

/// Mint a fresh agent name of the form `agent-<monotonic-id>`.
///
/// The counter is seeded from the wall clock so names stay distinct across
/// process restarts sharing one backend.
pub fn generate_name() -> String {
    let counter = NAME_COUNTER.get_or_init(|| {
        let seed = chrono::Utc::now().timestamp_millis().unsigned_abs();
        AtomicU64::new(seed)
    });
    format!("agent-{}", counter.fetch_add(1, Ordering::Relaxed))
}

/// Agent names are free-form labels; only degenerate values are rejected.
pub fn validate_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::validation("agent name cannot be empty"));
    }
    if name.len() > 128 {
        return Err(DomainError::validation(
            "agent name must be at most 128 characters",
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(DomainError::validation(
            "agent name cannot contain control characters",
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AgentService {
    storage: Arc<dyn StorageBackend>,
}

impl AgentService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// All agents currently holding a lease in the project.
    #[instrument(skip(self))]
    pub async fn list_active(&self, project_id: Uuid) -> DomainResult<Vec<ActiveAgent>> {
        self.storage.list_active_agents(project_id).await
    }

    /// The agent's current lease, if it holds one in this project.
    #[instrument(skip(self))]
    pub async fn status(
        &self,
        name: &str,
        project_id: Uuid,
    ) -> DomainResult<Option<ActiveAgent>> {
        validate_name(name)?;
        let agents = self.storage.list_active_agents(project_id).await?;
        Ok(agents.into_iter().find(|a| a.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_are_distinct() {
        let a = generate_name();
        let b = generate_name();
        assert_ne!(a, b);
        assert!(a.starts_with("agent-"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("worker-7").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(129)).is_err());
        assert!(validate_name("bad\nname").is_err());
    }
}
