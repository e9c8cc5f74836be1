use crate::{state::AppState, websocket::handler::websocket_handler};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the streaming endpoint. Authentication happens in the first frame.
pub fn create_ws_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}
