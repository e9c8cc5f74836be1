use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::db::chat_archive;
use crate::error::{ClassroomError, ClassroomResult, ValidationKind};
use crate::models::{
    ChatId, ChatMessage, ClassId, DeleteEvent, HistoryResponse, MessageType, ReactionEvent, TypingEvent, UserId,
};
use crate::store::{keys, SharedStore};
use crate::ws::broker::Broker;
use crate::ws::topics::Topic;

/// Per-class chat log with soft delete, reply snapshots and binary reactions.
///
/// Messages live under `chat:message:{id}` with ids from the store-wide
/// `chat:seq` counter; `chat:class:{cid}:messages` orders them by id. Reaction
/// counts are never stored on the message, they are read from
/// `chat:message:{id}:reactions` when history is served.
pub struct ChatService {
    store: SharedStore,
    broker: Arc<Broker>,
    max_length: usize,
}

impl ChatService {
    pub fn new(store: SharedStore, broker: Arc<Broker>, max_length: usize) -> Self {
        Self { store, broker, max_length }
    }

    pub fn send(
        &self,
        class_id: ClassId,
        user_id: UserId,
        username: &str,
        content: &str,
        reply_to: Option<ChatId>,
    ) -> ClassroomResult<ChatMessage> {
        if content.trim().is_empty() {
            return Err(ClassroomError::validation(ValidationKind::ContentEmpty, "message content is empty"));
        }
        if content.chars().count() > self.max_length {
            return Err(ClassroomError::validation(
                ValidationKind::ContentTooLong,
                format!("message content exceeds {} characters", self.max_length),
            ));
        }

        let reply = match reply_to {
            Some(target_id) => {
                let target = self.message_in_class(class_id, target_id)?;
                Some((target.chat_id, target.username, target.content))
            }
            None => None,
        };
        let (reply_to_chat_id, reply_to_username, reply_to_content) = match reply {
            Some((id, name, content)) => (Some(id), Some(name), Some(content)),
            None => (None, None, None),
        };

        let chat_id = self.store.incr(keys::CHAT_SEQ);
        let msg = ChatMessage {
            chat_id,
            class_id,
            user_id,
            username: username.to_string(),
            content: content.to_string(),
            message_type: MessageType::Chat,
            created_at: Utc::now(),
            reply_to_chat_id,
            reply_to_username,
            reply_to_content,
            deleted: false,
            reaction_count: 0,
        };

        // A new id starts with no reactions
        self.store.delete(&keys::reactions(chat_id));
        self.store.set_json(&keys::chat_message(chat_id), &msg)?;
        self.store.zadd(&keys::class_messages(class_id), chat_id, &chat_id.to_string());
        debug!("Stored chat message {} in class {}", chat_id, class_id);

        self.broker.publish(&Topic::ClassChat(class_id), &msg);
        chat_archive::archive_message(&msg);
        Ok(msg)
    }

    /// Soft delete by the author. The message keeps its id and position.
    pub fn delete(&self, class_id: ClassId, chat_id: ChatId, requester: UserId) -> ClassroomResult<DeleteEvent> {
        let msg = self.message_in_class(class_id, chat_id)?;
        if msg.user_id != requester {
            return Err(ClassroomError::AccessDenied(format!("message {} belongs to another user", chat_id)));
        }

        // Check-and-tombstone in one step so two racing deletes cannot both win
        let was_deleted = self
            .store
            .update_json(&keys::chat_message(chat_id), |m: &mut ChatMessage| {
                let was = m.deleted;
                if !was {
                    m.mark_deleted();
                }
                was
            })
            .ok_or_else(|| ClassroomError::NotFound(format!("chat message {}", chat_id)))?;
        if was_deleted {
            return Err(ClassroomError::validation(ValidationKind::AlreadyDeleted, "message is already deleted"));
        }

        let event = DeleteEvent { chat_id, class_id, message_type: MessageType::Delete };
        info!("Chat message {} in class {} deleted by user {}", chat_id, class_id, requester);
        self.broker.publish(&Topic::ClassChat(class_id), &event);
        chat_archive::archive_delete(chat_id);
        Ok(event)
    }

    /// All messages of the class in id order, with live reaction counts
    pub fn history(&self, class_id: ClassId) -> Vec<ChatMessage> {
        let ids = self.message_ids(class_id);
        let message_keys: Vec<String> = ids.iter().map(|id| keys::chat_message(*id)).collect();
        let reaction_keys: Vec<String> = ids.iter().map(|id| keys::reactions(*id)).collect();

        let raw = self.store.get_many(&message_keys);
        let counts = self.store.scard_many(&reaction_keys);

        raw.into_iter()
            .zip(counts)
            .zip(&message_keys)
            .filter_map(|((raw, count), key)| {
                // Messages can expire before their class index does
                let raw = raw?;
                match serde_json::from_str::<ChatMessage>(&raw) {
                    Ok(mut msg) => {
                        msg.reaction_count = count;
                        Some(msg)
                    }
                    Err(e) => {
                        error!("Skipping unreadable chat message {}: {}", key, e);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn history_response(&self, class_id: ClassId) -> HistoryResponse {
        let messages = self.history(class_id);
        HistoryResponse { class_id, total_count: messages.len(), messages }
    }

    pub fn get_message(&self, chat_id: ChatId) -> Option<ChatMessage> {
        let mut msg: ChatMessage = self.store.get_json(&keys::chat_message(chat_id))?;
        msg.reaction_count = self.store.scard(&keys::reactions(chat_id));
        Some(msg)
    }

    /// Add or remove the user's reaction; returns the new count
    pub fn toggle_reaction(&self, class_id: ClassId, chat_id: ChatId, user_id: UserId) -> ClassroomResult<usize> {
        let msg = self.message_in_class(class_id, chat_id)?;
        if msg.deleted {
            return Err(ClassroomError::validation(ValidationKind::MessageDeleted, "cannot react to a deleted message"));
        }

        let (reacted, count) = self.store.stoggle(&keys::reactions(chat_id), &user_id.to_string());
        debug!("User {} {} message {} ({} total)", user_id, if reacted { "reacted to" } else { "unreacted" }, chat_id, count);

        let event = ReactionEvent { chat_id, class_id, count, message_type: MessageType::Reaction };
        self.broker.publish(&Topic::ClassChat(class_id), &event);
        Ok(count)
    }

    pub fn reaction_users(&self, chat_id: ChatId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .store
            .smembers(&keys::reactions(chat_id))
            .iter()
            .filter_map(|u| u.parse().ok())
            .collect();
        users.sort_unstable();
        users
    }

    pub fn has_reacted(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.store.sismember(&keys::reactions(chat_id), &user_id.to_string())
    }

    /// Typing indicators are broadcast only, never stored
    pub fn broadcast_typing(&self, class_id: ClassId, user_id: UserId, username: &str, typing: bool) {
        let event = TypingEvent { class_id, user_id, username: username.to_string(), typing };
        self.broker.publish(&Topic::ClassTyping(class_id), &event);
    }

    /// Drop every message, index and reaction set of the class
    pub fn cleanup(&self, class_id: ClassId) -> usize {
        let ids = self.message_ids(class_id);
        for id in &ids {
            self.store.delete(&keys::chat_message(*id));
            self.store.delete(&keys::reactions(*id));
        }
        self.store.delete(&keys::class_messages(class_id));
        info!("Chat of class {} cleaned up ({} message(s))", class_id, ids.len());
        ids.len()
    }

    fn message_ids(&self, class_id: ClassId) -> Vec<ChatId> {
        self.store
            .zrange_all(&keys::class_messages(class_id))
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    fn message_in_class(&self, class_id: ClassId, chat_id: ChatId) -> ClassroomResult<ChatMessage> {
        let msg: ChatMessage = self
            .store
            .get_json(&keys::chat_message(chat_id))
            .ok_or_else(|| ClassroomError::NotFound(format!("chat message {}", chat_id)))?;
        if msg.class_id != class_id {
            return Err(ClassroomError::AccessDenied(format!(
                "message {} does not belong to class {}",
                chat_id, class_id
            )));
        }
        Ok(msg)
    }
}
