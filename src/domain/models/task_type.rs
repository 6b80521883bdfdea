//! Task type domain model.
//!
//! Task types are templates for tasks: they carry an optional `{{var}}`
//! instruction template, the duplicate policy, and per-type retry/lease
//! defaults inherited from the project at creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How task creation treats an input whose fingerprint matches an
/// existing queued, running, or completed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    /// Always create a new task.
    #[default]
    Allow,
    /// Return the existing task unchanged.
    Ignore,
    /// Reject the creation with a duplicate error.
    Fail,
}

impl DuplicateHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ignore => "ignore",
            Self::Fail => "fail",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "allow" => Some(Self::Allow),
            "ignore" => Some(Self::Ignore),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// A template definition for tasks within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskType {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Unique within the project.
    pub name: String,
    /// Instruction template with `{{var}}` placeholders. Empty means tasks
    /// of this type supply their own instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Placeholder names extracted from the template.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,
    pub max_retries: u32,
    pub lease_duration_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskType {
    /// Whether tasks of this type derive their instructions from the template.
    pub fn has_template(&self) -> bool {
        self.template.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.name.len() > 64 {
            return Err("task type name must be 1-64 characters".to_string());
        }
        if self.lease_duration_minutes == 0 {
            return Err("leaseDurationMinutes must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_type(template: Option<&str>) -> TaskType {
        let now = Utc::now();
        TaskType {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "build".to_string(),
            template: template.map(String::from),
            variables: vec![],
            duplicate_handling: DuplicateHandling::default(),
            max_retries: 3,
            lease_duration_minutes: 10,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_has_template() {
        assert!(task_type(Some("Do {{x}}")).has_template());
        assert!(!task_type(Some("")).has_template());
        assert!(!task_type(None).has_template());
    }

    #[test]
    fn test_duplicate_handling_parse() {
        assert_eq!(DuplicateHandling::from_str("allow"), Some(DuplicateHandling::Allow));
        assert_eq!(DuplicateHandling::from_str("IGNORE"), Some(DuplicateHandling::Ignore));
        assert_eq!(DuplicateHandling::from_str("fail"), Some(DuplicateHandling::Fail));
        assert_eq!(DuplicateHandling::from_str("reject"), None);
    }

    #[test]
    fn test_default_is_allow() {
        assert_eq!(DuplicateHandling::default(), DuplicateHandling::Allow);
    }

    #[test]
    fn test_validation() {
        let mut tt = task_type(None);
        assert!(tt.validate().is_ok());
        tt.name = String::new();
        assert!(tt.validate().is_err());
        tt.name = "build".to_string();
        tt.lease_duration_minutes = 0;
        assert!(tt.validate().is_err());
    }
}
