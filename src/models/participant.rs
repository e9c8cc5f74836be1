use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ClassId, UserId};

/// Directory entry for a user present in a class
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub instructor: bool,
    pub joined_at: DateTime<Utc>,
}

/// Full roster of a class; broadcast on every join/leave and served over REST
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantsMessage {
    pub class_id: ClassId,
    pub participants: Vec<ParticipantInfo>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, ToSchema, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub class_id: ClassId,
    pub count: usize,
}
