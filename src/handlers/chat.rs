use crate::{
    auth::auth,
    error::ClassroomError,
    models::{ChatId, ClassId, ErrorResponse, HistoryResponse, ReactedResponse, ReactionUser},
    services::auth_service::{fallback_display_name, Principal},
    state::AppState,
};
use axum::{extract::{Extension, Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::debug;

/// Chat history of a class, oldest first
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<ClassId>,
) -> Result<(StatusCode, Json<HistoryResponse>), (StatusCode, Json<ErrorResponse>)> {
    let history = state.chat.history_response(class_id);
    debug!("Serving {} chat message(s) of class {}", history.total_count, class_id);
    Ok((StatusCode::OK, Json(history)))
}

/// Users who reacted to a message
pub async fn chat_reactions(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<ChatId>,
) -> Result<(StatusCode, Json<Vec<ReactionUser>>), (StatusCode, Json<ErrorResponse>)> {

    // The message decides which class roster names are looked up in
    let msg = state
        .chat
        .get_message(chat_id)
        .ok_or_else(|| ClassroomError::NotFound(format!("chat message {}", chat_id)))?;

    let users = state
        .chat
        .reaction_users(chat_id)
        .into_iter()
        .map(|user_id| ReactionUser {
            user_id,
            username: state
                .directory
                .get(msg.class_id, user_id)
                .map(|p| p.username)
                .unwrap_or_else(|| fallback_display_name(user_id)),
        })
        .collect();

    Ok((StatusCode::OK, Json(users)))
}

/// Whether the caller reacted to a message
pub async fn chat_reacted(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(chat_id): Path<ChatId>,
) -> Result<(StatusCode, Json<ReactedResponse>), (StatusCode, Json<ErrorResponse>)> {
    let identity = auth::ensure_user(&principal)?;
    let reacted = state.chat.has_reacted(chat_id, identity.user_id);
    Ok((StatusCode::OK, Json(ReactedResponse { chat_id, reacted })))
}
