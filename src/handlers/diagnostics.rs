use crate::{auth::auth, models::{DiagnosticsResponse, ErrorResponse}, services::auth_service::Principal, state::AppState};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Live connection, session and topic counts plus host stats
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Ensure the caller is an admin or a service
    auth::ensure_admin(&principal)?;

    let n_conn = state.hub.count() as u32;
    let n_sessions = state.registry.session_count() as u32;
    let n_topics = state.broker.topic_count() as u32;
    let n_subscribers = state.broker.subscriber_count() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Sessions: {}, Topics: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_sessions,
        n_topics
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_sessions,
            n_topics,
            n_subscribers,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
