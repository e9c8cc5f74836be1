pub mod chat;
pub mod code;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod participant;
pub mod session;
pub mod system;

pub use chat::*;
pub use code::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use participant::*;
pub use session::*;
pub use system::*;

pub type UserId = i64;
pub type ClassId = i64;
pub type ChatId = i64;
pub type ConnectionId = uuid::Uuid;
