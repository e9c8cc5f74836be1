pub mod chat;
pub mod class;
pub mod code;
pub mod diagnostics;
pub mod health;
pub mod participants;

pub use chat::*;
pub use class::*;
pub use code::*;
pub use diagnostics::*;
pub use health::*;
pub use participants::*;
