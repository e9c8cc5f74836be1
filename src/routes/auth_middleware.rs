use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::error_response;
use crate::models::ErrorResponse;
use crate::services::auth_service::{get_auth_token, Principal};
use crate::state::AppState;

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {

    // 1. Get the auth token from the request
    let token = get_auth_token(&req).map_err(|e| {
        debug!("Rejecting {}: {}", req.uri().path(), e);
        error_response(StatusCode::UNAUTHORIZED, e, "AUTHENTICATION_FAILED")
    })?;

    // 2. Validate it and work out who is calling
    let principal = state.authenticator.verify(&token).map_err(|e| {
        warn!("Rejecting {}: {}", req.uri().path(), e);
        e.to_response()
    })?;

    match &principal {
        Principal::User(identity) => debug!("User {} authenticated", identity.user_id),
        Principal::Service(name) => debug!("Service {} authenticated", name),
    }

    // 3. Hand the principal to downstream handlers
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
