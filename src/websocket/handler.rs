use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::{HeaderMap, Uri},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ClassroomError;
use crate::models::{ConnectionId, ReceivedMessage, ServerMessage, SystemEvent, UserId};
use crate::services::auth_service::get_auth_token_from;
use crate::state::AppState;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::websocket::msg_send_handler::handle_send_message;
use crate::websocket::msg_subscribe_handler::{handle_subscribe_message, handle_unsubscribe_message};
use crate::ws::broker::Broker;
use crate::ws::connctx::Outbound;
use crate::ws::topics::Topic;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!("New WebSocket connection attempt");
    // A credential on the upgrade request is used when the connect frame has none
    let upgrade_token = get_auth_token_from(&headers, &uri).ok();
    ws.on_upgrade(move |socket| handle_socket(socket, state, upgrade_token))
}

/// One authenticated streaming connection and its topic subscriptions
pub struct LiveConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub state: Arc<AppState>,
    subscriptions: HashMap<Topic, JoinHandle<()>>,
}

impl LiveConnection {
    fn new(id: ConnectionId, user_id: UserId, state: Arc<AppState>) -> Self {
        Self { id, user_id, state, subscriptions: HashMap::new() }
    }

    /// Queue a frame for this connection's writer
    pub fn send(&self, msg: &ServerMessage) -> bool {
        self.state.hub.send(&self.id, Arc::from(msg.to_text()))
    }

    pub fn send_error(&self, err: &ClassroomError, destination: Option<String>) {
        self.send(&ServerMessage::error(err.reason(), err.to_string(), destination));
    }

    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.subscriptions.contains_key(topic)
    }

    /// Forward everything published on `topic` to this connection
    pub fn subscribe(&mut self, topic: Topic) {
        if self.is_subscribed(&topic) {
            return;
        }
        let mut rx = self.state.broker.subscribe(&topic);
        let hub = self.state.hub.clone();
        let id = self.id;
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => {
                        if !hub.send(&id, frame) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connection {} lagging on {}, {} message(s) skipped", id, topic, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions.insert(topic, forwarder);
        debug!("Connection {} subscribed to {}", self.id, topic);
    }

    pub fn unsubscribe(&mut self, topic: &Topic) -> bool {
        match self.subscriptions.remove(topic) {
            Some(forwarder) => {
                forwarder.abort();
                self.state.broker.prune(topic);
                debug!("Connection {} unsubscribed from {}", self.id, topic);
                true
            }
            None => false,
        }
    }

    /// Stop forwarding and release the session. Safe after eviction.
    fn shutdown(&mut self) {
        for (_, forwarder) in self.subscriptions.drain() {
            forwarder.abort();
        }
        self.state.registry.disconnect(&self.id);
        self.state.hub.remove(&self.id);
        debug!("Connection {} of user {} released", self.id, self.user_id);
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, upgrade_token: Option<String>) {
    // Generate unique connection ID to identify this client
    let connection_id = Uuid::new_v4();

    // Split the socket into sender and receiver
    let (mut sender, mut receiver) = socket.split();

    // 1. The first frame must authenticate the connection
    let session = match handshake(connection_id, &state, &mut receiver, upgrade_token).await {
        Ok(session) => session,
        Err(err_frame) => {
            let _ = sender.send(Message::Text(err_frame.to_text())).await;
            let _ = sender.close().await;
            info!("WebSocket handshake rejected for connection {}", connection_id);
            return;
        }
    };
    let user_id = session.session.user_id;

    // 2. Register the connection; its writer drains everything queued for it
    let registration = state.hub.register(connection_id, user_id);
    let aborted = registration.aborted;
    let mut send_task = tokio::spawn(write_loop(sender, registration.outbound, connection_id));

    // 3. Replaced connections of the same user are told why, then closed
    for old in &session.evicted {
        if let Some(frame) = Broker::frame(&Topic::UserSystem(user_id), &SystemEvent::SessionReplaced) {
            state.hub.send(old, frame);
        }
        state.hub.close(old);
    }

    let mut conn = LiveConnection::new(connection_id, user_id, state.clone());
    conn.subscribe(Topic::UserSystem(user_id));
    conn.send(&ServerMessage::Connected { connection_id, session: session.session });

    // A newer login of the same user may have won while we were registering
    if state.registry.resolve(&connection_id).is_none() {
        if let Some(frame) = Broker::frame(&Topic::UserSystem(user_id), &SystemEvent::SessionReplaced) {
            state.hub.send(&connection_id, frame);
        }
        state.hub.close(&connection_id);
    }
    info!("WebSocket connection established: {} for user {}", connection_id, user_id);

    // 4. Serve client frames until either side goes away
    tokio::select! {
        _ = read_loop(&mut conn, &mut receiver) => {},
        _ = (&mut send_task) => {},
        _ = aborted.notified() => {
            warn!("Connection {} aborted, its outbound queue overflowed", connection_id);
        },
    };

    // 5. Always release the session, whichever way the connection ended
    conn.shutdown();
    send_task.abort();
    info!("WebSocket connection terminated: {}", connection_id);
}

async fn handshake(
    connection_id: ConnectionId,
    state: &AppState,
    receiver: &mut SplitStream<WebSocket>,
    upgrade_token: Option<String>,
) -> Result<crate::services::session_registry::Authenticated, ServerMessage> {
    let required = || ServerMessage::error("AUTHENTICATION_REQUIRED", "first frame must be 'connect'", None);

    let first = match tokio::time::timeout(HANDSHAKE_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(_) => return Err(required()),
        Err(_) => {
            warn!("Connection {} sent no connect frame in time", connection_id);
            return Err(required());
        }
    };

    let connect = match serde_json::from_str::<ReceivedMessage>(&first) {
        Ok(ReceivedMessage::Connect(connect)) => connect,
        Ok(other) => {
            warn!("Connection {} sent {:?} before connecting", connection_id, other);
            return Err(required());
        }
        Err(e) => {
            warn!("Connection {} sent an unreadable first frame: {}", connection_id, e);
            return Err(required());
        }
    };

    let Some(token) = connect.token.or(upgrade_token) else {
        return Err(ServerMessage::error("AUTHENTICATION_FAILED", "no credential supplied", None));
    };

    state
        .registry
        .authenticate(connection_id, &token, connect.class_id)
        .await
        .map_err(|e| {
            warn!("Authentication failed for connection {}: {}", connection_id, e);
            ServerMessage::error(e.reason(), e.to_string(), None)
        })
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<Outbound>,
    connection_id: ConnectionId,
) {
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Frame(frame) => {
                if sender.send(Message::Text(frame.to_string())).await.is_err() {
                    debug!("Connection {} went away while writing", connection_id);
                    break;
                }
            }
            Outbound::Close => {
                let _ = sender.close().await;
                break;
            }
        }
    }
}

async fn read_loop(conn: &mut LiveConnection, receiver: &mut SplitStream<WebSocket>) {
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Connection {} read error: {}", conn.id, e);
                break;
            }
        };

        // Parse the incoming message as JSON
        let json_msg: ReceivedMessage = match serde_json::from_str(&text) {
            Ok(json_msg) => json_msg,
            Err(e) => {
                error!("Failed to parse message on connection {}: {}", conn.id, e);
                conn.send(&ServerMessage::error("MALFORMED_REQUEST", format!("unreadable frame: {}", e), None));
                continue;
            }
        };

        // Handle different message types
        match json_msg {
            ReceivedMessage::Subscribe(msg) => handle_subscribe_message(conn, &msg).await,
            ReceivedMessage::Unsubscribe(msg) => handle_unsubscribe_message(conn, &msg),
            ReceivedMessage::Send(msg) => handle_send_message(conn, msg),
            ReceivedMessage::Ping => handle_ping_message(conn),
            ReceivedMessage::Connect(_) => {
                conn.send(&ServerMessage::error("ALREADY_CONNECTED", "connection is already authenticated", None));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clients::roster_client::StaticRoster;
    use crate::config::Config;
    use crate::models::Role;
    use crate::routes::create_ws_routes;
    use crate::services::auth_service::tests::{user_token, SECRET};
    use crate::state::tests::test_state;
    use crate::state::AppState;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve() -> String {
        serve_state(test_state()).await
    }

    async fn serve_state(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_ws_routes(state)).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    async fn send(ws: &mut Client, frame: Value) {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    /// Next JSON frame, or None once the server closed the socket
    async fn next(ws: &mut Client) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap()?;
            match msg {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Skip frames until one arrives on `topic`
    async fn next_on(ws: &mut Client, topic: &str) -> Value {
        loop {
            let frame = next(ws).await.expect("socket closed");
            if frame["type"] == "message" && frame["topic"] == topic {
                return frame["body"].clone();
            }
        }
    }

    async fn connect(url: &str, user_id: i64, role: &str) -> Client {
        let (mut ws, _) = connect_async(url).await.unwrap();
        send(&mut ws, json!({"type": "connect", "token": user_token(user_id, &format!("user{}", user_id), role)})).await;
        let frame = next(&mut ws).await.unwrap();
        assert_eq!(frame["type"], "connected");
        assert_eq!(frame["session"]["userId"], user_id);
        ws
    }

    #[tokio::test]
    async fn frames_before_connect_are_refused() {
        let url = serve().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        send(&mut ws, json!({"type": "subscribe", "topic": "class.7.chat"})).await;

        let frame = next(&mut ws).await.unwrap();
        assert_eq!(frame["code"], "AUTHENTICATION_REQUIRED");
        assert!(next(&mut ws).await.is_none());
    }

    #[tokio::test]
    async fn bad_credentials_close_the_socket() {
        let url = serve().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
        send(&mut ws, json!({"type": "connect", "token": "forged"})).await;

        let frame = next(&mut ws).await.unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "AUTHENTICATION_FAILED");
        assert!(next(&mut ws).await.is_none());
    }

    #[tokio::test]
    async fn chat_flows_between_class_members() {
        let url = serve().await;
        let mut ada = connect(&url, 1, "INSTRUCTOR").await;
        let mut bob = connect(&url, 2, "STUDENT").await;

        send(&mut ada, json!({"type": "subscribe", "topic": "class.7.participants"})).await;
        send(&mut ada, json!({"type": "subscribe", "topic": "class.7.chat"})).await;
        let roster = next_on(&mut ada, "class.7.participants").await;
        assert_eq!(roster["count"], 1);

        send(&mut bob, json!({"type": "subscribe", "topic": "class.7.chat"})).await;
        let roster = next_on(&mut ada, "class.7.participants").await;
        assert_eq!(roster["count"], 2);

        send(&mut bob, json!({"type": "send", "destination": "chat.send.7", "body": {"content": "hello"}})).await;
        let msg = next_on(&mut ada, "class.7.chat").await;
        assert_eq!(msg["content"], "hello");
        assert_eq!(msg["userId"], 2);
        assert_eq!(next_on(&mut bob, "class.7.chat").await["content"], "hello");

        // Empty content is rejected with a frame to the sender only
        send(&mut bob, json!({"type": "send", "destination": "chat.send.7", "body": {"content": " "}})).await;
        let err = next(&mut bob).await.unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "CONTENT_EMPTY");
        assert_eq!(err["destination"], "chat.send.7");

        // Leaving the chat topic leaves the class
        send(&mut bob, json!({"type": "unsubscribe", "topic": "class.7.chat"})).await;
        let roster = next_on(&mut ada, "class.7.participants").await;
        assert_eq!(roster["count"], 1);
    }

    #[tokio::test]
    async fn unauthorized_sends_are_dropped_silently() {
        let url = serve().await;
        let mut bob = connect(&url, 2, "STUDENT").await;
        send(&mut bob, json!({"type": "subscribe", "topic": "class.7.chat"})).await;

        send(&mut bob, json!({"type": "send", "destination": "code.instructor.7", "body": {"code": "x", "language": "py"}})).await;
        send(&mut bob, json!({"type": "ping"})).await;

        // The pong is the very next frame: no error was produced for the drop
        let frame = next(&mut bob).await.unwrap();
        assert_eq!(frame["type"], "pong");
    }

    #[tokio::test]
    async fn foreign_student_topics_are_refused() {
        let url = serve().await;
        let mut bob = connect(&url, 2, "STUDENT").await;

        send(&mut bob, json!({"type": "subscribe", "topic": "code.student.7.3"})).await;
        assert_eq!(next(&mut bob).await.unwrap()["code"], "FORBIDDEN");

        send(&mut bob, json!({"type": "subscribe", "topic": "nonsense"})).await;
        assert_eq!(next(&mut bob).await.unwrap()["code"], "INVALID_TOPIC");
    }

    #[tokio::test]
    async fn joins_refused_by_the_roster_get_a_system_notice() {
        let roster = StaticRoster::new();
        roster.enroll(7, 2, Role::Participant);
        let config = Config { auth_jwt_secret: Some(SECRET.to_string()), ..Config::default() };
        let url = serve_state(Arc::new(AppState::new(&config, Some(Arc::new(roster))))).await;
        let mut bob = connect(&url, 2, "STUDENT").await;

        send(&mut bob, json!({"type": "subscribe", "topic": "class.8.chat"})).await;
        let notice = next_on(&mut bob, "class.8.chat").await;
        assert_eq!(notice["type"], "SYSTEM");
        assert_eq!(notice["classId"], 8);
        assert_eq!(notice["chatId"], 0);
        assert!(notice["content"].as_str().unwrap().contains("not enrolled"));
        assert_eq!(next(&mut bob).await.unwrap()["code"], "ACCESS_DENIED");

        // The enrolled class still opens, and the notice never reached history
        send(&mut bob, json!({"type": "subscribe", "topic": "class.7.chat"})).await;
        send(&mut bob, json!({"type": "send", "destination": "chat.send.7", "body": {"content": "in"}})).await;
        assert_eq!(next_on(&mut bob, "class.7.chat").await["type"], "CHAT");
    }

    #[tokio::test]
    async fn a_second_login_replaces_the_first_connection() {
        let url = serve().await;
        let mut first = connect(&url, 2, "STUDENT").await;
        let _second = connect(&url, 2, "STUDENT").await;

        let notice = next_on(&mut first, "user.2.system").await;
        assert_eq!(notice["type"], "SESSION_REPLACED");
        assert!(next(&mut first).await.is_none());
    }
}
