// Identity boundary. Authentication itself lives in the surrounding
// platform; every request reaches this subsystem with an `x-user-id`
// header naming the already-authenticated caller.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's identity, inserted as a request extension once the
/// header has been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

pub async fn require_user_identity(mut request: Request, next: Next) -> Response {
    let user_id = match request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .filter(|id| !id.is_nil())
    {
        Some(user_id) => user_id,
        None => return unauthenticated_response(),
    };

    request.extensions_mut().insert(AuthenticatedUser { user_id });

    next.run(request).await
}

fn unauthenticated_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": "missing or invalid x-user-id header",
            }
        })),
    )
        .into_response()
}
