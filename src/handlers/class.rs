use crate::{
    auth::auth,
    error::ClassroomError,
    models::{ClassId, ErrorResponse, UserId},
    services::auth_service::Principal,
    state::AppState,
};
use axum::{extract::{Extension, Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct KickParams {
    pub reason: Option<String>,
}

/// End a class for everyone in it
pub async fn end_class(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(class_id): Path<ClassId>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {

    // Ensure the caller runs this class
    auth::ensure_class_manager(&state, &principal, class_id).await?;

    state.admin.end_class(class_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a user from the class roster and notify them
pub async fn kick_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path((class_id, user_id)): Path<(ClassId, UserId)>,
    Query(params): Query<KickParams>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_class_manager(&state, &principal, class_id).await?;

    if !state.directory.exists(class_id, user_id) {
        return Err(ClassroomError::NotFound(format!("user {} in class {}", user_id, class_id)).into());
    }
    state.admin.kick_user(class_id, user_id, params.reason);
    Ok(StatusCode::NO_CONTENT)
}
