use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ClassroomError, ClassroomResult, ValidationKind};
use crate::models::{
    ChatRefRequest, SendChatRequest, SendMessage, ServerMessage, Session, ShareCodeRequest, TypingRequest,
};
use crate::state::AppState;
use crate::websocket::handler::LiveConnection;
use crate::ws::topics::Destination;

/// Handle a send frame.
///
/// The session is resolved again for every frame, so a connection that was
/// evicted or left its class acts with its current state. Role violations
/// are dropped with a log line; every other failure goes back to the sender
/// as an error frame naming the destination.
pub fn handle_send_message(conn: &LiveConnection, msg: SendMessage) {
    let destination = match msg.destination.parse::<Destination>() {
        Ok(destination) => destination,
        Err(e) => {
            warn!("Connection {} sent to {}", conn.id, e);
            conn.send(&ServerMessage::error("INVALID_DESTINATION", e.to_string(), Some(msg.destination)));
            return;
        }
    };

    let Some(session) = conn.state.registry.resolve(&conn.id) else {
        debug!("Connection {} has no session, dropping send to {}", conn.id, destination);
        return;
    };

    match dispatch(&conn.state, &session, destination, msg.body) {
        Ok(()) => {}
        Err(ClassroomError::Authorization(reason)) => {
            warn!("Dropped send from user {} to {}: {}", session.user_id, destination, reason);
        }
        Err(e) => {
            debug!("Send from user {} to {} failed: {}", session.user_id, destination, e);
            conn.send_error(&e, Some(destination.to_string()));
        }
    }
}

fn dispatch(state: &AppState, session: &Session, destination: Destination, body: Value) -> ClassroomResult<()> {
    let class_id = match destination {
        Destination::ChatSend(c)
        | Destination::ChatDelete(c)
        | Destination::ChatReaction(c)
        | Destination::ChatTyping(c)
        | Destination::InstructorCode(c)
        | Destination::StudentCode(c)
        | Destination::InstructorEdit(c, _)
        | Destination::ClassMode(c)
        | Destination::QuizStart(c)
        | Destination::QuizEnd(c) => c,
    };
    if session.current_class_id != Some(class_id) {
        return Err(ClassroomError::AccessDenied(format!(
            "user {} is not in class {}",
            session.user_id, class_id
        )));
    }

    match destination {
        Destination::ChatSend(_) => {
            let req: SendChatRequest = parse_body(body)?;
            state
                .chat
                .send(class_id, session.user_id, &session.display_name, &req.content, req.reply_to_chat_id)?;
        }
        Destination::ChatDelete(_) => {
            let req: ChatRefRequest = parse_body(body)?;
            state.chat.delete(class_id, req.chat_id, session.user_id)?;
        }
        Destination::ChatReaction(_) => {
            let req: ChatRefRequest = parse_body(body)?;
            state.chat.toggle_reaction(class_id, req.chat_id, session.user_id)?;
        }
        Destination::ChatTyping(_) => {
            let req: TypingRequest = parse_body(body)?;
            state.chat.broadcast_typing(class_id, session.user_id, &session.display_name, req.typing);
        }
        Destination::InstructorCode(_) => {
            let req: ShareCodeRequest = parse_body(body)?;
            state.code.share_instructor_code(session, class_id, &req.code, &req.language)?;
        }
        Destination::StudentCode(_) => {
            let req: ShareCodeRequest = parse_body(body)?;
            state.code.share_student_code(session, class_id, &req.code, &req.language)?;
        }
        Destination::InstructorEdit(_, student_id) => {
            let req: ShareCodeRequest = parse_body(body)?;
            state
                .code
                .edit_student_code_by_instructor(session, class_id, student_id, &req.code, &req.language)?;
        }
        Destination::ClassMode(_) => {
            state.admin.change_mode(session, class_id, body)?;
        }
        Destination::QuizStart(_) => {
            state.admin.start_quiz(session, class_id, body)?;
        }
        Destination::QuizEnd(_) => {
            state.admin.end_quiz(session, class_id, body)?;
        }
    }
    Ok(())
}

fn parse_body<T: DeserializeOwned>(body: Value) -> ClassroomResult<T> {
    serde_json::from_value(body)
        .map_err(|e| ClassroomError::validation(ValidationKind::Malformed, format!("invalid payload: {}", e)))
}
