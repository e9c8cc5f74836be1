use axum::{http::StatusCode, Json};
use tracing::warn;

use crate::error::error_response;
use crate::models::{ClassId, ErrorResponse, Role};
use crate::services::auth_service::{Identity, Principal};
use crate::state::AppState;

type Rejection = (StatusCode, Json<ErrorResponse>);

/// Platform administrators and other services
pub fn is_admin(principal: &Principal) -> bool {
    match principal {
        Principal::User(identity) => identity.is_admin(),
        Principal::Service(_) => true,
    }
}

pub fn ensure_user(principal: &Principal) -> Result<&Identity, Rejection> {
    match principal {
        Principal::User(identity) => Ok(identity),
        Principal::Service(name) => Err(error_response(
            StatusCode::FORBIDDEN,
            format!("Service '{}' cannot act as a user", name),
            "FORBIDDEN",
        )),
    }
}

pub fn ensure_admin(principal: &Principal) -> Result<(), Rejection> {
    if is_admin(principal) {
        return Ok(());
    }
    Err(error_response(StatusCode::FORBIDDEN, "Admin access required", "FORBIDDEN"))
}

/// Allow admins and the instructor of `class_id`.
///
/// The instructor is whoever the roster names; without a roster it is a
/// caller whose live session is the instructor in that class, or whose token
/// carries an instructor role.
pub async fn ensure_class_manager(state: &AppState, principal: &Principal, class_id: ClassId) -> Result<(), Rejection> {
    if is_admin(principal) {
        return Ok(());
    }
    let identity = ensure_user(principal)?;

    let allowed = match &state.roster {
        Some(roster) => match roster.class_access(class_id, identity.user_id).await {
            Ok(access) => access.is_some_and(|a| a.role.is_instructor()),
            Err(e) => {
                warn!("Roster lookup failed while authorizing user {}: {}", identity.user_id, e);
                false
            }
        },
        None => {
            let live = state
                .registry
                .session_of(identity.user_id)
                .is_some_and(|s| s.current_class_id == Some(class_id) && s.is_instructor());
            live || Role::from_claim(identity.role_claim.as_deref()).is_instructor()
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::FORBIDDEN,
            format!("Instructor access to class {} required", class_id),
            "FORBIDDEN",
        ))
    }
}
