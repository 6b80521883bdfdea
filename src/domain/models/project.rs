//! Project domain model.
//!
//! Projects organize work: task types and tasks are always scoped to a
//! project, and queue dispatch never crosses project boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    /// Project accepts new tasks and dispatches work.
    Active,
    /// Project is closed; no new tasks or claims.
    Closed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// Per-project defaults applied at task-type and task creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Default retry budget for new task types (0-10).
    pub default_max_retries: u32,
    /// Default lease duration in minutes for new task types (1-1440).
    pub default_lease_duration_minutes: u32,
    /// Interval between reaper sweeps for this project (1-60).
    pub reaper_interval_minutes: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_lease_duration_minutes: 10,
            reaper_interval_minutes: 5,
        }
    }
}

impl ProjectConfig {
    /// Validate the configured ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_max_retries > 10 {
            return Err(format!(
                "defaultMaxRetries must be between 0 and 10, got {}",
                self.default_max_retries
            ));
        }
        if !(1..=1440).contains(&self.default_lease_duration_minutes) {
            return Err(format!(
                "defaultLeaseDurationMinutes must be between 1 and 1440, got {}",
                self.default_lease_duration_minutes
            ));
        }
        if !(1..=60).contains(&self.reaper_interval_minutes) {
            return Err(format!(
                "reaperIntervalMinutes must be between 1 and 60, got {}",
                self.reaper_interval_minutes
            ));
        }
        Ok(())
    }
}

/// Task counts by status. Derived from task records on every read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A project groups task types and tasks under a unique name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    /// Unique across active and closed projects.
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: ProjectConfig,
    /// Recomputed from task counts on read; the stored value is a cache.
    #[serde(default)]
    pub stats: ProjectStats,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            instructions: None,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
            config: ProjectConfig::default(),
            stats: ProjectStats::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    /// Project names are 1-64 characters of alphanumerics, dashes, and
    /// underscores, starting with an alphanumeric.
    pub fn validate_name(name: &str) -> Result<(), String> {
        if name.is_empty() || name.len() > 64 {
            return Err("project name must be 1-64 characters".to_string());
        }
        let mut chars = name.chars();
        let first = chars.next().unwrap_or(' ');
        if !first.is_ascii_alphanumeric() {
            return Err("project name must start with a letter or digit".to_string());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(
                "project name may contain only letters, digits, dashes, and underscores"
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        Self::validate_name(&self.name)?;
        self.config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["p", "my-project", "my_project", "Proj3ct", "a1-b2_c3"] {
            assert!(Project::validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(Project::validate_name("").is_err());
        assert!(Project::validate_name(&"x".repeat(65)).is_err());
        assert!(Project::validate_name("-leading-dash").is_err());
        assert!(Project::validate_name("has space").is_err());
        assert!(Project::validate_name("has/slash").is_err());
    }

    #[test]
    fn test_config_ranges() {
        let mut config = ProjectConfig::default();
        assert!(config.validate().is_ok());

        config.default_max_retries = 11;
        assert!(config.validate().is_err());

        config = ProjectConfig::default();
        config.default_lease_duration_minutes = 0;
        assert!(config.validate().is_err());
        config.default_lease_duration_minutes = 1441;
        assert!(config.validate().is_err());

        config = ProjectConfig::default();
        config.reaper_interval_minutes = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_project_is_active() {
        let project = Project::new("queue", "work queue");
        assert!(project.is_active());
        assert_eq!(project.stats, ProjectStats::default());
    }
}
