use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ClassId, ConnectionId, UserId};

/// Role of a user inside a class
#[derive(Serialize, Deserialize, ToSchema, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Instructor,
    #[serde(alias = "STUDENT")]
    Participant,
}

impl Role {
    pub fn is_instructor(self) -> bool {
        self == Role::Instructor
    }

    /// Map a role claim from the identity service. Anything that is not an
    /// instructor role is a participant.
    pub fn from_claim(claim: Option<&str>) -> Role {
        match claim.map(|c| c.trim().to_ascii_uppercase()) {
            Some(c) if c == "INSTRUCTOR" || c == "TEACHER" => Role::Instructor,
            _ => Role::Participant,
        }
    }
}

/// Live identity bound to one connection
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub current_class_id: Option<ClassId>,
    pub connected_at: DateTime<Utc>,
}

impl Session {
    pub fn is_instructor(&self) -> bool {
        self.role.is_instructor()
    }
}
