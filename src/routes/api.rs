use crate::{
    handlers::{
        chat_history, chat_reacted, chat_reactions, diagnostics, end_class, health_check, instructor,
        instructor_code, kick_user, participant_count, participants, ready_check, student_code, students,
    },
    routes::auth_middleware::auth_middleware,
    state::AppState,
};
use axum::{middleware, routing::{get, post}, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/v1/classes/:class_id/chat/history", get(chat_history))
        .route("/v1/chat/:chat_id/reactions", get(chat_reactions))
        .route("/v1/chat/:chat_id/reacted", get(chat_reacted))
        .route("/v1/classes/:class_id/code/instructor", get(instructor_code))
        .route("/v1/classes/:class_id/code/students/:student_id", get(student_code))
        .route("/v1/classes/:class_id/participants", get(participants))
        .route("/v1/classes/:class_id/students", get(students))
        .route("/v1/classes/:class_id/instructor", get(instructor))
        .route("/v1/classes/:class_id/count", get(participant_count))
        .route("/v1/classes/:class_id/end", post(end_class))
        .route("/v1/classes/:class_id/kick/:user_id", post(kick_user))
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth_service::tests::user_token;
    use crate::state::tests::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn call(state: &Arc<AppState>, method: Method, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = create_api_routes(state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    #[tokio::test]
    async fn health_needs_no_credential() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn missing_or_bad_credentials_get_the_error_body() {
        let state = test_state();
        let (status, body) = call(&state, Method::GET, "/v1/classes/7/chat/history", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
        assert_eq!(body["reason"], "AUTHENTICATION_FAILED");

        let (status, _) = call(&state, Method::GET, "/v1/classes/7/chat/history", Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn hydration_reads_what_the_live_layer_wrote() {
        let state = test_state();
        let token = user_token(2, "Bob", "STUDENT");
        let b = Uuid::new_v4();
        state.registry.authenticate(b, &token, None).await.unwrap();
        state.registry.join_class(&b, 7).await.unwrap();
        let msg = state.chat.send(7, 2, "Bob", "hello", None).unwrap();
        state.chat.toggle_reaction(7, msg.chat_id, 2).unwrap();
        state.chat.toggle_reaction(7, msg.chat_id, 99).unwrap();

        let (status, body) = call(&state, Method::GET, "/v1/classes/7/chat/history", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCount"], 1);
        assert_eq!(body["messages"][0]["reactionCount"], 2);

        let uri = format!("/v1/chat/{}/reactions", msg.chat_id);
        let (_, body) = call(&state, Method::GET, &uri, Some(&token)).await;
        assert_eq!(body[0]["username"], "Bob");
        assert_eq!(body[1]["username"], "User#99");

        let uri = format!("/v1/chat/{}/reacted", msg.chat_id);
        let (_, body) = call(&state, Method::GET, &uri, Some(&token)).await;
        assert_eq!(body["reacted"], true);

        let (_, body) = call(&state, Method::GET, "/v1/classes/7/participants", Some(&token)).await;
        assert_eq!(body["count"], 1);
        let (_, body) = call(&state, Method::GET, "/v1/classes/7/count", Some(&token)).await;
        assert_eq!(body["count"], 1);
        let (status, body) = call(&state, Method::GET, "/v1/classes/7/instructor", Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "NOT_FOUND");

        let (_, body) = call(&state, Method::GET, "/v1/classes/7/code/students/2", Some(&token)).await;
        assert_eq!(body["empty"], true);

        let (status, _) = call(&state, Method::GET, "/v1/chat/404/reactions", Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_class_managers_end_or_kick() {
        let state = test_state();
        let student = user_token(2, "Bob", "STUDENT");
        let ada = user_token(1, "Ada", "INSTRUCTOR");
        let admin = user_token(3, "Root", "ADMIN");

        let (status, body) = call(&state, Method::POST, "/v1/classes/7/end", Some(&student)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "FORBIDDEN");

        // Only users present in the class can be kicked
        let (status, body) = call(&state, Method::POST, "/v1/classes/7/kick/2?reason=noise", Some(&ada)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "NOT_FOUND");

        let b = Uuid::new_v4();
        state.registry.authenticate(b, &student, None).await.unwrap();
        state.registry.join_class(&b, 7).await.unwrap();
        let (status, _) = call(&state, Method::POST, "/v1/classes/7/kick/2?reason=noise", Some(&ada)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!state.directory.exists(7, 2));
        let (status, _) = call(&state, Method::POST, "/v1/classes/7/end", Some(&admin)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn diagnostics_are_admin_only() {
        let state = test_state();
        let (status, _) = call(&state, Method::GET, "/v1/diagnostics", Some(&user_token(1, "Ada", "INSTRUCTOR"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&state, Method::GET, "/v1/diagnostics", Some(&user_token(3, "Root", "ADMIN"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["n_sessions"], 0);
    }
}
