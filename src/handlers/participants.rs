use crate::{
    error::ClassroomError,
    models::{ClassId, CountResponse, ErrorResponse, ParticipantInfo, ParticipantsMessage},
    state::AppState,
};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;

/// Everyone currently in the class
pub async fn participants(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<ParticipantsMessage>), (StatusCode, Json<ErrorResponse>)> {
    Ok((StatusCode::OK, Json(state.directory.roster(class_id))))
}

pub async fn students(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<Vec<ParticipantInfo>>), (StatusCode, Json<ErrorResponse>)> {
    Ok((StatusCode::OK, Json(state.directory.list_students(class_id))))
}

pub async fn instructor(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<ParticipantInfo>), (StatusCode, Json<ErrorResponse>)> {
    let info = state
        .directory
        .get_instructor(class_id)
        .ok_or_else(|| ClassroomError::NotFound(format!("instructor of class {}", class_id)))?;
    Ok((StatusCode::OK, Json(info)))
}

pub async fn participant_count(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<CountResponse>), (StatusCode, Json<ErrorResponse>)> {
    let count = state.directory.count(class_id);
    Ok((StatusCode::OK, Json(CountResponse { class_id, count })))
}
