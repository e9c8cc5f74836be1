use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ChatId, ClassId, UserId};

/// Content a deleted message is replaced with
pub const DELETED_CONTENT: &str = "This message has been deleted.";

/// Kind of event carried on a class chat topic
#[derive(Serialize, Deserialize, ToSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Chat,
    System,
    Delete,
    Reaction,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub chat_id: ChatId,
    pub class_id: ClassId,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,

    // Reply snapshot, copied at creation time
    pub reply_to_chat_id: Option<ChatId>,
    pub reply_to_username: Option<String>,
    pub reply_to_content: Option<String>,

    pub deleted: bool,
    /// Filled from the live reaction set on read; always 0 in the store
    #[serde(default)]
    pub reaction_count: usize,
}

impl ChatMessage {
    /// A notice from the server itself. Never stored, so it carries no id.
    pub fn system(class_id: ClassId, content: impl Into<String>) -> Self {
        ChatMessage {
            chat_id: 0,
            class_id,
            user_id: 0,
            username: "System".to_string(),
            content: content.into(),
            message_type: MessageType::System,
            created_at: Utc::now(),
            reply_to_chat_id: None,
            reply_to_username: None,
            reply_to_content: None,
            deleted: false,
            reaction_count: 0,
        }
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.content = DELETED_CONTENT.to_string();
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendChatRequest {
    pub content: String,
    pub reply_to_chat_id: Option<ChatId>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatRefRequest {
    pub chat_id: ChatId,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub typing: bool,
}

/// Broadcast after a soft delete so subscribers can patch their view
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEvent {
    pub chat_id: ChatId,
    pub class_id: ClassId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub chat_id: ChatId,
    pub class_id: ClassId,
    pub count: usize,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub class_id: ClassId,
    pub user_id: UserId,
    pub username: String,
    pub typing: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub class_id: ClassId,
    pub messages: Vec<ChatMessage>,
    pub total_count: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUser {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReactedResponse {
    pub chat_id: ChatId,
    pub reacted: bool,
}
