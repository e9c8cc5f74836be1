use tracing::{debug, error};
use chrono::Utc;

use crate::models::ServerMessage;
use crate::websocket::handler::LiveConnection;

/// Handle a ping frame: reply with pong
pub fn handle_ping_message(conn: &LiveConnection) {
    debug!("Ping message received on connection {}", conn.id);

    let pong = ServerMessage::Pong { date: Utc::now().to_rfc3339() };
    if !conn.send(&pong) {
        error!("Failed to queue Pong message for connection {}", conn.id);
    }
}
