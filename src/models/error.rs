use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
    /// Stable machine-readable reason, e.g. `CONTENT_TOO_LONG`
    pub reason: String,
}
