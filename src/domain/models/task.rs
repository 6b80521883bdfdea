//! Task domain model.
//!
//! Tasks are the unit of dispatch: queued work items claimed by ephemeral
//! agents under a time-bounded lease. Every lease span is recorded as an
//! attempt, and all state transitions flow through the methods here so that
//! every storage backend applies identical semantics.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the project queue.
    Queued,
    /// Claimed by an agent under an active lease.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed permanently (retry budget exhausted or non-retriable). Terminal.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Queued => &[Self::Running],
            Self::Running => &[Self::Queued, Self::Completed, Self::Failed],
            Self::Completed => &[],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Status of a single lease span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Running,
    Completed,
    Failed,
    /// The lease expired before the agent reported an outcome.
    Timeout,
}

/// Outcome reported by an agent (or synthesized by the reaper).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TaskResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            metadata: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            metadata: None,
        }
    }
}

/// Record of one lease span on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAttempt {
    pub id: Uuid,
    pub agent_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub lease_expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

/// Result of applying failure semantics to a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry budget remained; the task went back to the queue.
    Requeued,
    /// The task is terminally failed.
    Failed,
}

/// A discrete unit of work dispatched to at most one agent at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub type_id: Uuid,
    pub description: String,
    /// For template-bearing types this is derived from the template at read
    /// time and left empty in storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Sorted map so the duplicate fingerprint is canonical.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Copied from the task type at creation so claims survive type deletion.
    pub lease_duration_minutes: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Canonical duplicate-detection hash.
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub attempts: Vec<TaskAttempt>,
    /// Version for optimistic locking in CAS-based backends.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Lease held by `agent_name` and still within its expiry at `now`.
    pub fn holds_lease(&self, agent_name: &str, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self.assigned_to.as_deref() == Some(agent_name)
            && self.lease_expires_at.is_some_and(|at| at > now)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Running
            && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    fn assert_owned_by(&self, agent_name: &str) -> DomainResult<()> {
        if self.status != TaskStatus::Running
            || self.assigned_to.as_deref() != Some(agent_name)
        {
            return Err(DomainError::NotAssigned {
                task_id: self.id,
                agent_name: agent_name.to_string(),
            });
        }
        Ok(())
    }

    /// Transition `queued -> running`: assign the task to `agent_name` and
    /// open a new attempt with a fresh lease.
    pub fn begin_attempt(&mut self, agent_name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != TaskStatus::Queued {
            return Err(DomainError::Conflict {
                entity: "task",
                id: self.id.to_string(),
                detail: format!("cannot claim task in status {}", self.status.as_str()),
            });
        }
        let lease_expires_at = now + Duration::minutes(i64::from(self.lease_duration_minutes));
        self.status = TaskStatus::Running;
        self.assigned_to = Some(agent_name.to_string());
        self.assigned_at = Some(now);
        self.lease_expires_at = Some(lease_expires_at);
        self.updated_at = now;
        self.version += 1;
        self.attempts.push(TaskAttempt {
            id: Uuid::new_v4(),
            agent_name: agent_name.to_string(),
            started_at: now,
            completed_at: None,
            status: AttemptStatus::Running,
            failure_reason: None,
            lease_expires_at,
            result: None,
        });
        Ok(())
    }

    /// Transition `running -> completed`, asserting lease ownership.
    pub fn record_completion(
        &mut self,
        agent_name: &str,
        result: TaskResult,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.assert_owned_by(agent_name)?;
        self.status = TaskStatus::Completed;
        self.assigned_to = None;
        self.lease_expires_at = None;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.version += 1;
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.status = AttemptStatus::Completed;
            attempt.completed_at = Some(now);
            attempt.result = Some(result.clone());
        }
        self.result = Some(TaskResult {
            success: true,
            ..result
        });
        Ok(())
    }

    /// Transition `running -> queued` (retry budget remaining and retriable)
    /// or `running -> failed` (budget exhausted or non-retriable), asserting
    /// lease ownership.
    pub fn record_failure(
        &mut self,
        agent_name: &str,
        result: TaskResult,
        can_retry: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<FailureOutcome> {
        self.assert_owned_by(agent_name)?;
        self.apply_failure(result, can_retry, AttemptStatus::Failed, now)
    }

    /// Reclaim an expired lease: the last attempt is marked `timeout` and
    /// failure semantics apply with `can_retry = true`.
    pub fn record_timeout(&mut self, now: DateTime<Utc>) -> DomainResult<FailureOutcome> {
        if !self.lease_expired(now) {
            return Err(DomainError::Conflict {
                entity: "task",
                id: self.id.to_string(),
                detail: "lease has not expired".to_string(),
            });
        }
        let mut metadata = serde_json::Map::new();
        metadata.insert("reclaimedAt".to_string(), serde_json::json!(now.to_rfc3339()));
        metadata.insert(
            "originalAssignedTo".to_string(),
            serde_json::json!(self.assigned_to.clone()),
        );
        metadata.insert(
            "originalAssignedAt".to_string(),
            serde_json::json!(self.assigned_at.map(|at| at.to_rfc3339())),
        );
        let result = TaskResult {
            success: false,
            output: None,
            error: Some("lease expired".to_string()),
            metadata: Some(metadata),
        };
        self.apply_failure(result, true, AttemptStatus::Timeout, now)
    }

    fn apply_failure(
        &mut self,
        result: TaskResult,
        can_retry: bool,
        attempt_status: AttemptStatus,
        now: DateTime<Utc>,
    ) -> DomainResult<FailureOutcome> {
        let reason = result.error.clone();
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.status = attempt_status;
            attempt.completed_at = Some(now);
            attempt.failure_reason = reason;
            attempt.result = Some(result.clone());
        }
        self.assigned_to = None;
        self.lease_expires_at = None;
        self.updated_at = now;
        self.version += 1;

        if can_retry && self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = TaskStatus::Queued;
            Ok(FailureOutcome::Requeued)
        } else {
            self.status = TaskStatus::Failed;
            self.failed_at = Some(now);
            self.result = Some(TaskResult {
                success: false,
                ..result
            });
            Ok(FailureOutcome::Failed)
        }
    }

    /// Push the lease out by `minutes` from `max(current expiry, now)`,
    /// asserting lease ownership.
    pub fn extend_lease(
        &mut self,
        agent_name: &str,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<DateTime<Utc>> {
        self.assert_owned_by(agent_name)?;
        let base = match self.lease_expires_at {
            Some(at) if at > now => at,
            _ => now,
        };
        let new_expiry = base + Duration::minutes(i64::from(minutes));
        self.lease_expires_at = Some(new_expiry);
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.lease_expires_at = new_expiry;
        }
        self.updated_at = now;
        self.version += 1;
        Ok(new_expiry)
    }
}

/// Canonical duplicate fingerprint over `(project, type, variables[,
/// instructions])`.
///
/// Variables are serialized as sorted `k=v` lines. The instructions
/// component is the empty string for template-bearing types (their
/// instructions are derived, never input) and the literal instructions
/// otherwise.
pub fn compute_fingerprint(
    project_id: Uuid,
    type_id: Uuid,
    variables: &BTreeMap<String, String>,
    instructions_component: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(type_id.to_string().as_bytes());
    for (key, value) in variables {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hasher.update(b"\n--\n");
    hasher.update(instructions_component.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_task(max_retries: u32) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            type_id: Uuid::new_v4(),
            description: "test".to_string(),
            instructions: Some("do the thing".to_string()),
            variables: BTreeMap::new(),
            status: TaskStatus::Queued,
            assigned_to: None,
            lease_expires_at: None,
            lease_duration_minutes: 10,
            retry_count: 0,
            max_retries,
            fingerprint: String::new(),
            batch_id: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            attempts: vec![],
            version: 1,
        }
    }

    #[test]
    fn test_begin_attempt_sets_lease() {
        let mut task = queued_task(3);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_to.as_deref(), Some("agent-1"));
        assert_eq!(task.attempts.len(), 1);
        assert_eq!(task.attempts[0].status, AttemptStatus::Running);
        let expiry = task.lease_expires_at.unwrap();
        assert_eq!(expiry, now + Duration::minutes(10));
    }

    #[test]
    fn test_begin_attempt_rejects_non_queued() {
        let mut task = queued_task(3);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        assert!(task.begin_attempt("agent-2", now).is_err());
    }

    #[test]
    fn test_completion_clears_assignment() {
        let mut task = queued_task(3);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        task.record_completion("agent-1", TaskResult::ok("done"), now)
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.assigned_to.is_none());
        assert!(task.lease_expires_at.is_none());
        assert!(task.completed_at.is_some());
        assert!(task.result.as_ref().unwrap().success);
        assert_eq!(task.attempts[0].status, AttemptStatus::Completed);
    }

    #[test]
    fn test_completion_requires_owner() {
        let mut task = queued_task(3);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        let err = task
            .record_completion("agent-2", TaskResult::ok("done"), now)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotAssigned { .. }));
    }

    #[test]
    fn test_failure_requeues_under_budget() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        let outcome = task
            .record_failure("agent-1", TaskResult::err("boom"), true, now)
            .unwrap();

        assert_eq!(outcome, FailureOutcome::Requeued);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 1);
        assert!(task.assigned_to.is_none());
        assert_eq!(task.attempts[0].status, AttemptStatus::Failed);
    }

    #[test]
    fn test_retry_boundary_is_terminal_at_max() {
        // maxRetries = 2: two failures requeue, the third is terminal with
        // the count still at the max.
        let mut task = queued_task(2);
        for agent in ["a", "b"] {
            let now = Utc::now();
            task.begin_attempt(agent, now).unwrap();
            let outcome = task
                .record_failure(agent, TaskResult::err("boom"), true, now)
                .unwrap();
            assert_eq!(outcome, FailureOutcome::Requeued);
        }
        assert_eq!(task.retry_count, 2);

        let now = Utc::now();
        task.begin_attempt("c", now).unwrap();
        let outcome = task
            .record_failure("c", TaskResult::err("boom"), true, now)
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
        assert!(task.failed_at.is_some());
    }

    #[test]
    fn test_non_retriable_failure_is_terminal() {
        let mut task = queued_task(5);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        let outcome = task
            .record_failure("agent-1", TaskResult::err("fatal"), false, now)
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Failed);
        assert_eq!(task.retry_count, 0);
        assert!(!task.result.as_ref().unwrap().success);
    }

    #[test]
    fn test_timeout_marks_attempt_and_requeues() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        let later = now + Duration::minutes(11);
        assert!(task.lease_expired(later));

        let outcome = task.record_timeout(later).unwrap();
        assert_eq!(outcome, FailureOutcome::Requeued);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.attempts[0].status, AttemptStatus::Timeout);
        let result = task.attempts[0].result.as_ref().unwrap();
        assert_eq!(result.error.as_deref(), Some("lease expired"));
        let metadata = result.metadata.as_ref().unwrap();
        assert_eq!(
            metadata["originalAssignedTo"],
            serde_json::json!("agent-1")
        );
    }

    #[test]
    fn test_timeout_rejected_while_lease_valid() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        assert!(task.record_timeout(now).is_err());
    }

    #[test]
    fn test_extend_lease_from_max_of_current_and_now() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();

        // Current expiry is in the future: extension stacks on it.
        let expiry = task.extend_lease("agent-1", 5, now).unwrap();
        assert_eq!(expiry, now + Duration::minutes(15));
        assert_eq!(task.attempts[0].lease_expires_at, expiry);

        // Simulate a lease already in the past: extension runs from now.
        task.lease_expires_at = Some(now - Duration::minutes(1));
        let expiry = task.extend_lease("agent-1", 5, now).unwrap();
        assert_eq!(expiry, now + Duration::minutes(5));
    }

    #[test]
    fn test_extend_lease_requires_owner() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        assert!(task.extend_lease("agent-2", 5, now).is_err());
    }

    #[test]
    fn test_holds_lease() {
        let mut task = queued_task(2);
        let now = Utc::now();
        task.begin_attempt("agent-1", now).unwrap();
        assert!(task.holds_lease("agent-1", now));
        assert!(!task.holds_lease("agent-2", now));
        assert!(!task.holds_lease("agent-1", now + Duration::minutes(11)));
    }

    #[test]
    fn test_fingerprint_is_order_insensitive() {
        let project = Uuid::new_v4();
        let ty = Uuid::new_v4();
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), "1".to_string());
        a.insert("y".to_string(), "2".to_string());
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), "2".to_string());
        b.insert("x".to_string(), "1".to_string());

        assert_eq!(
            compute_fingerprint(project, ty, &a, ""),
            compute_fingerprint(project, ty, &b, "")
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let project = Uuid::new_v4();
        let ty = Uuid::new_v4();
        let mut vars = BTreeMap::new();
        vars.insert("x".to_string(), "1".to_string());

        let base = compute_fingerprint(project, ty, &vars, "");
        assert_ne!(base, compute_fingerprint(project, ty, &BTreeMap::new(), ""));
        assert_ne!(base, compute_fingerprint(project, ty, &vars, "inline"));
        assert_ne!(
            base,
            compute_fingerprint(project, Uuid::new_v4(), &vars, "")
        );
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Completed.valid_transitions().is_empty());
    }
}
