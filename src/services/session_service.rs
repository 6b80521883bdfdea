//! Session service: signed bearer tokens over backend-stored sessions.
//!
//! Tokens are `base64("<sessionId>:<timestamp>:<nonce>:<hmac>")` with an
//! HMAC-SHA256 signature over the first three fields. Tokens are opaque to
//! callers; validity = signature valid AND session present AND not expired.
//! Because sessions live in the shared backend, a token issued by one
//! service instance is honored by every other.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Project, Session};
use crate::domain::ports::StorageBackend;
use crate::services::agent_service;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies session tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, session_id: Uuid) -> String {
        let timestamp = Utc::now().timestamp_millis();
        let nonce = format!("{:016x}", rand::random::<u64>());
        let payload = format!("{session_id}:{timestamp}:{nonce}");
        let mac = self.mac_hex(&payload);
        B64.encode(format!("{payload}:{mac}"))
    }

    /// Verify a token's signature and shape; returns the embedded session id.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let raw = B64.decode(token).ok()?;
        let decoded = String::from_utf8(raw).ok()?;
        let mut parts = decoded.splitn(4, ':');
        let session_id = parts.next()?;
        let timestamp = parts.next()?;
        let nonce = parts.next()?;
        let mac_hex = parts.next()?;

        timestamp.parse::<i64>().ok()?;
        let payload = format!("{session_id}:{timestamp}:{nonce}");
        let expected = decode_hex(mac_hex)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected).ok()?;

        session_id.parse().ok()
    }

    fn mac_hex(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        let bytes = mac.finalize().into_bytes();
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Options for session creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionOptions {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub data: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub allow_multiple_sessions: bool,
    #[serde(default)]
    pub resume_existing: bool,
}

/// A session plus its freshly minted token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub session: Session,
    pub session_token: String,
    pub resumed: bool,
}

/// Fully resolved session: the stored record plus the agent label and
/// project it is bound to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session: Session,
    pub agent: AgentRef,
    pub project: Project,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub name: String,
    pub project_id: Uuid,
}

#[derive(Clone)]
pub struct SessionService {
    storage: Arc<dyn StorageBackend>,
    signer: TokenSigner,
    default_ttl_seconds: u64,
}

impl SessionService {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        signer: TokenSigner,
        default_ttl_seconds: u64,
    ) -> Self {
        Self {
            storage,
            signer,
            default_ttl_seconds,
        }
    }

    /// Create (or resume) a session for an agent on a project.
    #[instrument(skip(self, project, options), fields(project = %project.name), err)]
    pub async fn create(
        &self,
        agent_name: &str,
        project: &Project,
        options: CreateSessionOptions,
    ) -> DomainResult<SessionHandle> {
        agent_service::validate_name(agent_name)?;
        let ttl = options.ttl_seconds.unwrap_or(self.default_ttl_seconds);

        let mut existing = self.find_active_for_agent(agent_name, project.id).await?;

        if options.resume_existing && !existing.is_empty() {
            // Most recently accessed active session wins.
            let mut session = existing.remove(0);
            session.extend(ttl, Utc::now());
            self.storage.update_session(&session).await?;
            let token = self.signer.sign(session.id);
            return Ok(SessionHandle {
                session,
                session_token: token,
                resumed: true,
            });
        }

        if !options.allow_multiple_sessions {
            for stale in existing {
                self.storage.delete_session(stale.id).await?;
            }
        }

        let mut session = Session::new(agent_name, project.id, ttl);
        if let Some(data) = options.data {
            session.data = data;
        }
        self.storage.create_session(&session).await?;
        let token = self.signer.sign(session.id);
        Ok(SessionHandle {
            session,
            session_token: token,
            resumed: false,
        })
    }

    /// Signature check plus session load; expired or unknown sessions yield
    /// `None`. Touches `lastAccessedAt` on success.
    #[instrument(skip(self, token), err)]
    pub async fn authenticate(&self, token: &str) -> DomainResult<Option<Session>> {
        let Some(session_id) = self.signer.verify(token) else {
            return Ok(None);
        };
        let Some(mut session) = self.storage.get_session(session_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        if session.is_expired(now) {
            return Ok(None);
        }
        session.touch(now);
        self.storage.update_session(&session).await?;
        Ok(Some(session))
    }

    /// Full resolve of a token to `{session, agent, project}`. A session
    /// whose project has vanished is destroyed and reported invalid.
    #[instrument(skip(self, token), err)]
    pub async fn validate(&self, token: &str) -> DomainResult<Option<SessionContext>> {
        let Some(session) = self.authenticate(token).await? else {
            return Ok(None);
        };
        let Some(project) = self.storage.get_project(session.project_id).await? else {
            warn!(session_id = %session.id, "destroying session bound to missing project");
            self.storage.delete_session(session.id).await?;
            return Ok(None);
        };
        let agent = AgentRef {
            name: session.agent_name.clone(),
            project_id: project.id,
        };
        Ok(Some(SessionContext {
            session,
            agent,
            project,
        }))
    }

    #[instrument(skip(self), err)]
    pub async fn extend(&self, session_id: Uuid, ttl_seconds: Option<u64>) -> DomainResult<Session> {
        let mut session = self.require(session_id).await?;
        session.extend(ttl_seconds.unwrap_or(self.default_ttl_seconds), Utc::now());
        self.storage.update_session(&session).await?;
        Ok(session)
    }

    /// Merge caller state into the session's data map.
    #[instrument(skip(self, delta), err)]
    pub async fn update_data(
        &self,
        session_id: Uuid,
        delta: HashMap<String, serde_json::Value>,
    ) -> DomainResult<Session> {
        let mut session = self.require(session_id).await?;
        session.merge_data(delta);
        session.touch(Utc::now());
        self.storage.update_session(&session).await?;
        Ok(session)
    }

    #[instrument(skip(self), err)]
    pub async fn destroy(&self, session_id: Uuid) -> DomainResult<()> {
        self.storage.delete_session(session_id).await
    }

    /// Active (non-expired) sessions for an agent on a project, most
    /// recently accessed first.
    #[instrument(skip(self), err)]
    pub async fn find_active_for_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<Vec<Session>> {
        let now = Utc::now();
        let sessions = self
            .storage
            .find_sessions_by_agent(agent_name, project_id)
            .await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !s.is_expired(now))
            .collect())
    }

    /// Delete every session (active or not) for an agent on a project.
    #[instrument(skip(self), err)]
    pub async fn cleanup_for_agent(
        &self,
        agent_name: &str,
        project_id: Uuid,
    ) -> DomainResult<u64> {
        let sessions = self
            .storage
            .find_sessions_by_agent(agent_name, project_id)
            .await?;
        let mut removed = 0;
        for session in sessions {
            self.storage.delete_session(session.id).await?;
            removed += 1;
        }
        Ok(removed)
    }

    #[instrument(skip(self), err)]
    pub async fn cleanup_expired(&self) -> DomainResult<u64> {
        self.storage.cleanup_expired_sessions().await
    }

    async fn require(&self, session_id: Uuid) -> DomainResult<Session> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let signer = TokenSigner::new(b"secret-key".to_vec());
        let session_id = Uuid::new_v4();
        let token = signer.sign(session_id);
        assert_eq!(signer.verify(&token), Some(session_id));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let signer = TokenSigner::new(b"secret-key".to_vec());
        let token = signer.sign(Uuid::new_v4());

        let raw = B64.decode(&token).unwrap();
        let mut decoded = String::from_utf8(raw).unwrap();
        // Swap the embedded session id for another one.
        let other = Uuid::new_v4().to_string();
        decoded.replace_range(0..36, &other);
        let forged = B64.encode(decoded);

        assert_eq!(signer.verify(&forged), None);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = TokenSigner::new(b"secret-a".to_vec());
        let other = TokenSigner::new(b"secret-b".to_vec());
        let token = signer.sign(Uuid::new_v4());
        assert_eq!(other.verify(&token), None);
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        let signer = TokenSigner::new(b"secret".to_vec());
        assert_eq!(signer.verify(""), None);
        assert_eq!(signer.verify("not-base64!!!"), None);
        assert_eq!(signer.verify(&B64.encode("only:two")), None);
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("00ff"), Some(vec![0x00, 0xff]));
        assert_eq!(decode_hex("0"), None);
        assert_eq!(decode_hex("zz"), None);
    }
}
