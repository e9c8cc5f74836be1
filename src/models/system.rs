use serde::{Deserialize, Serialize};

use super::{ClassId, UserId};

/// Events on `class.{id}.system` and `user.{id}.system`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum SystemEvent {
    ClassEnded {
        class_id: ClassId,
    },
    Kicked {
        class_id: ClassId,
        user_id: UserId,
        reason: Option<String>,
    },
    /// Sent to a connection that is being replaced by a newer login
    SessionReplaced,
    #[serde(rename = "MODE")]
    ModeChanged {
        class_id: ClassId,
        mode: serde_json::Value,
    },
    /// The quiz payload is relayed as sent by the instructor
    #[serde(rename = "QUIZ_START")]
    QuizStarted {
        class_id: ClassId,
        quiz: serde_json::Value,
    },
    #[serde(rename = "QUIZ_END")]
    QuizEnded {
        class_id: ClassId,
        quiz: serde_json::Value,
    },
}
