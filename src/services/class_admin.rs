use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::{ClassroomError, ClassroomResult};
use crate::models::{ClassId, Session, SystemEvent, UserId};
use crate::services::chat_service::ChatService;
use crate::services::code_service::CodeService;
use crate::services::participant_directory::ParticipantDirectory;
use crate::services::session_registry::SessionRegistry;
use crate::ws::broker::Broker;
use crate::ws::topics::Topic;

/// Class lifecycle actions: end, kick, mode changes and quizzes
pub struct ClassAdmin {
    broker: Arc<Broker>,
    registry: Arc<SessionRegistry>,
    directory: Arc<ParticipantDirectory>,
    chat: Arc<ChatService>,
    code: Arc<CodeService>,
}

impl ClassAdmin {
    pub fn new(
        broker: Arc<Broker>,
        registry: Arc<SessionRegistry>,
        directory: Arc<ParticipantDirectory>,
        chat: Arc<ChatService>,
        code: Arc<CodeService>,
    ) -> Self {
        Self { broker, registry, directory, chat, code }
    }

    /// Announce the end, then drop presence, chat and code state of the class
    pub fn end_class(&self, class_id: ClassId) {
        self.broker.publish(&Topic::ClassSystem(class_id), &SystemEvent::ClassEnded { class_id });

        self.directory.clear_all(class_id);
        let members = self.registry.clear_class(class_id);
        let messages = self.chat.cleanup(class_id);
        let buffers = self.code.cleanup(class_id);
        info!(
            "Class {} ended: {} member(s), {} message(s), {} student buffer(s) released",
            class_id, members, messages, buffers
        );
    }

    /// Tell the user they were removed and drop them from the directory. The
    /// connection itself stays open.
    pub fn kick_user(&self, class_id: ClassId, user_id: UserId, reason: Option<String>) {
        let event = SystemEvent::Kicked { class_id, user_id, reason };
        self.broker.publish(&Topic::UserSystem(user_id), &event);
        self.directory.leave(class_id, user_id);
        info!("User {} kicked from class {}", user_id, class_id);
    }

    pub fn change_mode(&self, session: &Session, class_id: ClassId, mode: Value) -> ClassroomResult<()> {
        require_instructor(session, "change the mode of", class_id)?;
        info!("Class {} mode changed by user {}: {}", class_id, session.user_id, mode);
        self.broker.publish(&Topic::ClassSystem(class_id), &SystemEvent::ModeChanged { class_id, mode });
        Ok(())
    }

    pub fn start_quiz(&self, session: &Session, class_id: ClassId, quiz: Value) -> ClassroomResult<()> {
        require_instructor(session, "start a quiz in", class_id)?;
        info!("Quiz started in class {} by user {}", class_id, session.user_id);
        self.broker.publish(&Topic::ClassSystem(class_id), &SystemEvent::QuizStarted { class_id, quiz });
        Ok(())
    }

    pub fn end_quiz(&self, session: &Session, class_id: ClassId, quiz: Value) -> ClassroomResult<()> {
        require_instructor(session, "end a quiz in", class_id)?;
        info!("Quiz ended in class {} by user {}", class_id, session.user_id);
        self.broker.publish(&Topic::ClassSystem(class_id), &SystemEvent::QuizEnded { class_id, quiz });
        Ok(())
    }
}

fn require_instructor(session: &Session, action: &str, class_id: ClassId) -> ClassroomResult<()> {
    if session.is_instructor() {
        Ok(())
    } else {
        Err(ClassroomError::Authorization(format!(
            "user {} cannot {} class {}",
            session.user_id, action, class_id
        )))
    }
}
