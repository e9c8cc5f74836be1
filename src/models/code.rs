use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ClassId, UserId};

/// Stored code buffer. `user_id` is the owner, never the last editor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeBuffer {
    pub user_id: UserId,
    pub code: String,
    pub language: String,
    pub updated_at: DateTime<Utc>,
}

/// Broadcast envelope for a buffer update
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeMessage {
    pub class_id: ClassId,
    /// Owner of the buffer
    pub user_id: UserId,
    /// Display name of whoever made this edit
    pub username: String,
    pub code: String,
    pub language: String,
    /// Whether the editor is an instructor
    pub instructor: bool,
    /// Set when an instructor wrote into a student's buffer. The student
    /// applies it; the instructor ignores the echo.
    pub edited_by_instructor: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ShareCodeRequest {
    pub code: String,
    pub language: String,
}

/// Point-read result; `empty` instead of a missing body keeps the wire uniform
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeResponse {
    pub user_id: Option<UserId>,
    pub code: Option<String>,
    pub language: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub empty: bool,
}

impl CodeResponse {
    pub fn empty() -> Self {
        Self {
            user_id: None,
            code: None,
            language: None,
            updated_at: None,
            empty: true,
        }
    }
}

impl From<CodeBuffer> for CodeResponse {
    fn from(buffer: CodeBuffer) -> Self {
        Self {
            user_id: Some(buffer.user_id),
            code: Some(buffer.code),
            language: Some(buffer.language),
            updated_at: Some(buffer.updated_at),
            empty: false,
        }
    }
}
