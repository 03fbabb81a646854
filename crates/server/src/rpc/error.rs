// HTTP mapping for the typed error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use coedit_common::error::SyncError;

/// Wraps `SyncError` for axum handlers: `?` on any store, gate, or
/// coordinator call produces the wire envelope
/// `{ "error": { "code", "message" } }` with the matching status.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            // Identity is established by middleware; a gate rejection means
            // a known caller lacking the role, hence 403 rather than 401.
            SyncError::Unauthorized => StatusCode::FORBIDDEN,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::AlreadyCollaborator => StatusCode::CONFLICT,
            SyncError::InvalidRole(_) => StatusCode::BAD_REQUEST,
            SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let SyncError::Internal(ref message) = self.0 {
            error!(error = %message, "internal error surfaced to a request");
        }
        (
            self.status(),
            Json(json!({
                "error": {
                    "code": self.0.code(),
                    "message": self.0.to_string(),
                }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::ApiError;
    use coedit_common::error::SyncError;

    async fn body_json(error: SyncError) -> (StatusCode, Value) {
        let response = ApiError(error).into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error body should be readable");
        (status, serde_json::from_slice(&body).expect("error body should be json"))
    }

    #[tokio::test]
    async fn gate_rejection_is_forbidden() {
        let (status, body) = body_json(SyncError::Unauthorized).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn duplicate_collaborator_is_conflict() {
        let (status, body) = body_json(SyncError::AlreadyCollaborator).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_COLLABORATOR");
    }

    #[tokio::test]
    async fn not_found_carries_the_subject() {
        let (status, body) = body_json(SyncError::not_found("commit")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "commit not found");
    }
}
