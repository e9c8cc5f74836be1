pub mod api;
pub mod auth_middleware;
pub mod ws;

pub use api::create_api_routes;
pub use ws::create_ws_routes;
