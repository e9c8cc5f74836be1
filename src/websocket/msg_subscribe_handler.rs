use tracing::{debug, info, warn};

use crate::error::ClassroomError;
use crate::models::{ChatMessage, ClassId, ServerMessage, TopicMessage};
use crate::websocket::handler::LiveConnection;
use crate::ws::broker::Broker;
use crate::ws::topics::Topic;

/// Handle a subscribe frame. Subscribing to a class chat enters that class.
pub async fn handle_subscribe_message(conn: &mut LiveConnection, msg: &TopicMessage) {
    let topic = match msg.topic.parse::<Topic>() {
        Ok(topic) => topic,
        Err(e) => {
            warn!("Connection {} asked for {}", conn.id, e);
            conn.send(&ServerMessage::error("INVALID_TOPIC", e.to_string(), None));
            return;
        }
    };

    let Some(session) = conn.state.registry.resolve(&conn.id) else {
        debug!("Connection {} has no session, ignoring subscribe", conn.id);
        return;
    };

    match topic {
        Topic::StudentCode(_, student_id) if student_id != session.user_id && !session.is_instructor() => {
            warn!("User {} may not follow the code of student {}", session.user_id, student_id);
            conn.send_error(&forbidden(&topic), None);
            return;
        }
        Topic::UserSystem(user_id) if user_id != session.user_id => {
            warn!("User {} may not follow system events of user {}", session.user_id, user_id);
            conn.send_error(&forbidden(&topic), None);
            return;
        }
        Topic::ClassChat(class_id) => {
            let previous = session.current_class_id;
            if let Err(e) = conn.state.registry.join_class(&conn.id, class_id).await {
                info!("User {} could not join class {}: {}", session.user_id, class_id, e);
                if !matches!(e, ClassroomError::Authentication(_)) {
                    send_system_notice(conn, class_id, e.to_string());
                }
                conn.send_error(&e, None);
                return;
            }
            // Entering a new class leaves the old one, including its chat feed
            if let Some(old) = previous.filter(|old| *old != class_id) {
                conn.unsubscribe(&Topic::ClassChat(old));
            }
        }
        _ => {}
    }

    conn.subscribe(topic);
}

/// Handle an unsubscribe frame. Dropping the current class chat leaves the class.
pub fn handle_unsubscribe_message(conn: &mut LiveConnection, msg: &TopicMessage) {
    let Ok(topic) = msg.topic.parse::<Topic>() else {
        debug!("Connection {} unsubscribed from unknown topic '{}'", conn.id, msg.topic);
        return;
    };

    conn.unsubscribe(&topic);

    if let Topic::ClassChat(class_id) = topic {
        let in_class = conn
            .state
            .registry
            .resolve(&conn.id)
            .is_some_and(|s| s.current_class_id == Some(class_id));
        if in_class {
            conn.state.registry.leave_class(&conn.id);
        }
    }
}

/// Tell this connection alone, in its chat feed, why it was kept out
fn send_system_notice(conn: &LiveConnection, class_id: ClassId, content: String) {
    let notice = ChatMessage::system(class_id, content);
    if let Some(frame) = Broker::frame(&Topic::ClassChat(class_id), &notice) {
        conn.state.hub.send(&conn.id, frame);
    }
}

fn forbidden(topic: &Topic) -> ClassroomError {
    ClassroomError::Authorization(format!("cannot subscribe to {}", topic))
}
