use crate::{
    models::{ClassId, CodeResponse, ErrorResponse, UserId},
    state::AppState,
};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;

/// Current instructor buffer, or the empty sentinel
pub async fn instructor_code(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<CodeResponse>), (StatusCode, Json<ErrorResponse>)> {
    Ok((StatusCode::OK, Json(state.code.get_instructor_code(class_id))))
}

pub async fn student_code(
    State(state): State<Arc<AppState>>,
    Path((class_id, student_id)): Path<(ClassId, UserId)>,
) -> Result<(StatusCode, Json<CodeResponse>), (StatusCode, Json<ErrorResponse>)> {
    Ok((StatusCode::OK, Json(state.code.get_student_code(class_id, student_id))))
}
