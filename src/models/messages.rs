use serde::{Deserialize, Serialize};

use super::{ClassId, ConnectionId, Session};

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMessage {
    pub token: Option<String>,
    /// Class the client is about to enter; used to resolve the role
    pub class_id: Option<ClassId>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub topic: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub destination: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Frames a client may send
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "connect")]
    Connect(ConnectMessage),
    #[serde(rename = "subscribe")]
    Subscribe(TopicMessage),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(TopicMessage),
    #[serde(rename = "send")]
    Send(SendMessage),
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the server sends
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        connection_id: ConnectionId,
        session: Session,
    },
    #[serde(rename = "message")]
    Message {
        topic: String,
        body: serde_json::Value,
    },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong { date: String },
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>, destination: Option<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            destination,
        }
    }

    pub fn to_text(&self) -> String {
        // Every variant is plain data; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}
