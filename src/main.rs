mod models;
mod handlers;
mod routes;
mod docs;
mod websocket;
mod config;
mod db;
mod ws;
mod services;
mod clients;
mod auth;
mod store;
mod error;
mod state;

use axum::Router;
use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::{create_api_routes, create_ws_routes};
use clients::roster_client::{ClassRoster, RosterServiceClient, StaticRoster};
use docs::ApiDoc;
use config::Config;
use state::AppState;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "classroom_live=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    let config = config::init_config(config);
    info!("Environment: {}", config.environment);

    if config.auth_jwt_secret.is_none() {
        warn!("AUTH_JWT_SECRET is not set - every connection will be refused");
    }

    // Initialize the chat archive if a database URL is provided
    if let Some(db_url) = &config.db_url {
        match db::chat_archive::init_db(db_url).await {
            Ok(_) => info!("Chat archive initialized successfully"),
            Err(e) => {
                error!("Failed to initialize chat archive: {}", e);
                warn!("Chat messages will only live in the shared store");
            }
        }
    } else {
        warn!("No database URL configured - chat messages will only live in the shared store");
    }

    // Class roster service, used for roles and the entry gate
    let roster: Option<Arc<dyn ClassRoster>> = match (&config.roster_service_url, &config.auth_jwt_secret) {
        (Some(url), Some(secret)) => {
            match RosterServiceClient::new(url.clone(), secret.clone(), config.service_name.clone()) {
                Ok(client) => {
                    info!("Using class roster service at {}", url);
                    Some(Arc::new(client))
                }
                Err(e) => {
                    error!("Failed to create roster client: {}", e);
                    None
                }
            }
        }
        _ => match &config.roster_file {
            Some(path) => match StaticRoster::load(path) {
                Ok(roster) => {
                    info!("Using roster file {}", path);
                    Some(Arc::new(roster))
                }
                Err(e) => {
                    error!("{}", e);
                    None
                }
            },
            None => {
                warn!("No roster service configured - roles come from credentials and classes are not gated");
                None
            }
        },
    };

    let state = Arc::new(AppState::new(config, roster));

    // Combine all routes
    let app_routes = Router::new()
        // Mount the streaming endpoint
        .merge(create_ws_routes(state.clone()))
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config));

    // Start the server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}
