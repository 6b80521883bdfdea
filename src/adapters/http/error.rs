//! HTTP error mapping.
//!
//! Every error body is `{success: false, error, timestamp}`; the status
//! code is derived from the domain error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::domain::errors::DomainError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn too_many_requests() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limit exceeded".to_string(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let status = match &err {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
            DomainError::DuplicateTask(_)
            | DomainError::Conflict { .. }
            | DomainError::ProjectClosed(_)
            | DomainError::NotAssigned { .. }
            | DomainError::LeaseExpired(_) => StatusCode::CONFLICT,
            DomainError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.message,
            "timestamp": Utc::now().to_rfc3339(),
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_for(err: DomainError) -> StatusCode {
        ApiError::from(err).status
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(DomainError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(DomainError::Unauthorized("no".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(DomainError::not_found("task", Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(DomainError::DuplicateTask(Uuid::new_v4())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(DomainError::ProjectClosed("p".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(DomainError::NotAssigned {
                task_id: Uuid::new_v4(),
                agent_name: "a".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(DomainError::Backend("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(DomainError::Internal("bug".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
