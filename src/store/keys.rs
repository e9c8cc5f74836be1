//! Key naming for the shared store. One place so every component agrees on
//! where a piece of state lives.

use crate::models::{ChatId, ClassId, ConnectionId, UserId};

pub fn session(connection_id: &ConnectionId) -> String {
    format!("ws:session:{}", connection_id)
}

pub const SESSION_PREFIX: &str = "ws:session:";

pub fn user_session(user_id: UserId) -> String {
    format!("ws:user:{}:session", user_id)
}

pub fn class_members(class_id: ClassId) -> String {
    format!("ws:class:{}:members", class_id)
}

pub fn participants(class_id: ClassId) -> String {
    format!("participant:class:{}", class_id)
}

pub const CHAT_SEQ: &str = "chat:seq";

/// Keys exempt from the store TTL. The chat sequence must outlive every id it
/// handed out, or ids would repeat once it expired.
pub fn is_persistent(key: &str) -> bool {
    key == CHAT_SEQ
}

pub fn chat_message(chat_id: ChatId) -> String {
    format!("chat:message:{}", chat_id)
}

pub fn class_messages(class_id: ClassId) -> String {
    format!("chat:class:{}:messages", class_id)
}

pub fn reactions(chat_id: ChatId) -> String {
    format!("chat:message:{}:reactions", chat_id)
}

pub fn instructor_code(class_id: ClassId) -> String {
    format!("code:class:{}:instructor", class_id)
}

pub fn student_code(class_id: ClassId, user_id: UserId) -> String {
    format!("code:class:{}:student:{}", class_id, user_id)
}

/// Index of students with a buffer in the class, so cleanup never scans
pub fn class_code_students(class_id: ClassId) -> String {
    format!("code:class:{}:students", class_id)
}
