use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Chat history of a class, oldest first, with live reaction counts
#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/chat/history",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Chat history", body = HistoryResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn chat_history_doc() {}

/// Users who reacted to a message
#[utoipa::path(
    get,
    path = "/api/v1/chat/{chat_id}/reactions",
    params(("chat_id" = i64, Path, description = "Chat message id")),
    responses(
        (status = 200, description = "Reacting users", body = [ReactionUser]),
        (status = 404, description = "Unknown message", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn chat_reactions_doc() {}

/// Whether the caller reacted to a message
#[utoipa::path(
    get,
    path = "/api/v1/chat/{chat_id}/reacted",
    params(("chat_id" = i64, Path, description = "Chat message id")),
    responses(
        (status = 200, description = "Reaction state of the caller", body = ReactedResponse)
    )
)]
#[allow(dead_code)]
pub async fn chat_reacted_doc() {}

/// Instructor code snapshot
#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/code/instructor",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Buffer, or the empty sentinel", body = CodeResponse)
    )
)]
#[allow(dead_code)]
pub async fn instructor_code_doc() {}

/// Student code snapshot
#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/code/students/{student_id}",
    params(
        ("class_id" = i64, Path, description = "Class id"),
        ("student_id" = i64, Path, description = "Student user id")
    ),
    responses(
        (status = 200, description = "Buffer, or the empty sentinel", body = CodeResponse)
    )
)]
#[allow(dead_code)]
pub async fn student_code_doc() {}

/// Everyone currently in the class
#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/participants",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Current roster", body = ParticipantsMessage)
    )
)]
#[allow(dead_code)]
pub async fn participants_doc() {}

#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/students",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Students in the class", body = [ParticipantInfo])
    )
)]
#[allow(dead_code)]
pub async fn students_doc() {}

#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/instructor",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Instructor in the class", body = ParticipantInfo),
        (status = 404, description = "No instructor present", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn instructor_doc() {}

#[utoipa::path(
    get,
    path = "/api/v1/classes/{class_id}/count",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 200, description = "Number of people in the class", body = CountResponse)
    )
)]
#[allow(dead_code)]
pub async fn participant_count_doc() {}

/// End a class: notify everyone, then drop its live state
#[utoipa::path(
    post,
    path = "/api/v1/classes/{class_id}/end",
    params(("class_id" = i64, Path, description = "Class id")),
    responses(
        (status = 204, description = "Class ended"),
        (status = 403, description = "Caller does not run this class", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn end_class_doc() {}

/// Remove a user from the class roster
#[utoipa::path(
    post,
    path = "/api/v1/classes/{class_id}/kick/{user_id}",
    params(
        ("class_id" = i64, Path, description = "Class id"),
        ("user_id" = i64, Path, description = "User to remove"),
        ("reason" = Option<String>, Query, description = "Shown to the removed user")
    ),
    responses(
        (status = 204, description = "User removed"),
        (status = 403, description = "Caller does not run this class", body = ErrorResponse),
        (status = 404, description = "User is not in the class", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn kick_user_doc() {}

#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Live counters and host stats", body = DiagnosticsResponse),
        (status = 403, description = "Admin access required", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        chat_history_doc,
        chat_reactions_doc,
        chat_reacted_doc,
        instructor_code_doc,
        student_code_doc,
        participants_doc,
        students_doc,
        instructor_doc,
        participant_count_doc,
        end_class_doc,
        kick_user_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse, ErrorResponse, HistoryResponse, ChatMessage, MessageType, ReactionUser,
            ReactedResponse, CodeResponse, ParticipantsMessage, ParticipantInfo, CountResponse,
            DiagnosticsResponse, Session, Role
        )
    ),
    tags(
        (name = "classroom", description = "Live classroom hydration and admin endpoints")
    )
)]
pub struct ApiDoc;
