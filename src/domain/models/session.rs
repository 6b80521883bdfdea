//! Session domain model.
//!
//! Sessions bind an agent name to a project for the lifetime of a signed
//! bearer token. All session state lives in the shared storage backend so a
//! token issued by one service instance is valid on every other.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub agent_name: String,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Free-form caller state, merged on update.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(agent_name: impl Into<String>, project_id: Uuid, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_name: agent_name.into(),
            project_id,
            created_at: now,
            last_accessed_at: now,
            expires_at: now + Duration::seconds(ttl_seconds as i64),
            data: HashMap::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
    }

    pub fn extend(&mut self, ttl_seconds: u64, now: DateTime<Utc>) {
        self.expires_at = now + Duration::seconds(ttl_seconds as i64);
        self.last_accessed_at = now;
    }

    /// Merge caller state into the session; existing keys are overwritten.
    pub fn merge_data(&mut self, delta: HashMap<String, serde_json::Value>) {
        self.data.extend(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry() {
        let session = Session::new("agent-1", Uuid::new_v4(), 60);
        let now = Utc::now();
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn test_extend_pushes_expiry() {
        let mut session = Session::new("agent-1", Uuid::new_v4(), 60);
        let now = Utc::now();
        session.extend(3600, now);
        assert_eq!(session.expires_at, now + Duration::seconds(3600));
        assert_eq!(session.last_accessed_at, now);
    }

    #[test]
    fn test_merge_data_overwrites() {
        let mut session = Session::new("agent-1", Uuid::new_v4(), 60);
        session.data.insert("counter".to_string(), json!(1));

        let mut delta = HashMap::new();
        delta.insert("counter".to_string(), json!(2));
        delta.insert("mode".to_string(), json!("fast"));
        session.merge_data(delta);

        assert_eq!(session.data["counter"], json!(2));
        assert_eq!(session.data["mode"], json!("fast"));
    }
}
