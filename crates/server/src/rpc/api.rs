// File, commit, and collaborator routes. Every route sits behind the
// identity middleware and the access gate.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::access::Action;
use crate::coordinator::SyncCoordinator;
use crate::rpc::auth::{require_user_identity, AuthenticatedUser};
use crate::rpc::error::ApiError;

pub fn router(coordinator: Arc<SyncCoordinator>) -> Router {
    Router::new()
        .route("/api/files", post(create_file))
        .route("/api/save-commit", post(save_commit))
        .route("/api/commits", get(list_commits))
        .route("/api/commit/{commit_id}", get(get_commit))
        .route("/api/commit/{commit_id}/restore", post(restore_commit))
        .route("/api/add-collaborator", post(add_collaborator))
        .route("/api/change-role", post(change_role))
        .route("/api/collaborators", get(list_collaborators))
        .layer(middleware::from_fn(require_user_identity))
        .with_state(coordinator)
}

#[derive(Debug, Deserialize)]
struct CreateFileRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveCommitRequest {
    file_id: Uuid,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollaboratorRequest {
    file_id: Uuid,
    collaborator_id: Uuid,
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileQuery {
    file_id: Uuid,
}

async fn create_file(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let file = coordinator.db().lock().await.create_file(&payload.name, user.user_id)?;
    Ok((StatusCode::CREATED, Json(json!({ "file": file }))))
}

async fn save_commit(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<SaveCommitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let commit =
        coordinator.save_commit(user.user_id, payload.file_id, &payload.content).await?;
    Ok((StatusCode::CREATED, Json(json!({ "commit": commit }))))
}

async fn list_commits(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    coordinator.gate().authorize(user.user_id, query.file_id, Action::Read).await?;
    let commits = coordinator.db().lock().await.list_commits(query.file_id)?;
    Ok(Json(json!({ "commits": commits })))
}

async fn get_commit(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(commit_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let commit = coordinator.db().lock().await.get_commit(commit_id)?;
    coordinator.gate().authorize(user.user_id, commit.file_id, Action::Read).await?;
    Ok(Json(json!({ "commit": commit })))
}

async fn restore_commit(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(commit_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let file_id = coordinator.db().lock().await.get_commit(commit_id)?.file_id;
    let content = coordinator.restore_commit(user.user_id, file_id, commit_id).await?;
    Ok(Json(json!({ "content": content })))
}

async fn add_collaborator(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CollaboratorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    coordinator
        .gate()
        .add_collaborator(user.user_id, payload.file_id, payload.collaborator_id, &payload.role)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn change_role(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CollaboratorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    coordinator
        .gate()
        .change_role(user.user_id, payload.file_id, payload.collaborator_id, &payload.role)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_collaborators(
    State(coordinator): State<Arc<SyncCoordinator>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let collaborators = coordinator.gate().list_collaborators(user.user_id, query.file_id).await?;
    Ok(Json(json!({ "collaborators": collaborators })))
}
