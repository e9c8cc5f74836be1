use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::{ClassId, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown route '{0}'")]
pub struct RouteParseError(pub String);

/// Broadcast channels a connection can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ClassChat(ClassId),
    ClassTyping(ClassId),
    ClassParticipants(ClassId),
    ClassSystem(ClassId),
    InstructorCode(ClassId),
    StudentCode(ClassId, UserId),
    /// Targeted delivery to every connection of one user
    UserSystem(UserId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ClassChat(c) => write!(f, "class.{}.chat", c),
            Topic::ClassTyping(c) => write!(f, "class.{}.typing", c),
            Topic::ClassParticipants(c) => write!(f, "class.{}.participants", c),
            Topic::ClassSystem(c) => write!(f, "class.{}.system", c),
            Topic::InstructorCode(c) => write!(f, "code.instructor.{}", c),
            Topic::StudentCode(c, s) => write!(f, "code.student.{}.{}", c, s),
            Topic::UserSystem(u) => write!(f, "user.{}.system", u),
        }
    }
}

impl FromStr for Topic {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RouteParseError(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();
        let id = |p: &str| p.parse::<i64>().map_err(|_| err());
        match parts.as_slice() {
            ["class", c, "chat"] => Ok(Topic::ClassChat(id(c)?)),
            ["class", c, "typing"] => Ok(Topic::ClassTyping(id(c)?)),
            ["class", c, "participants"] => Ok(Topic::ClassParticipants(id(c)?)),
            ["class", c, "system"] => Ok(Topic::ClassSystem(id(c)?)),
            ["code", "instructor", c] => Ok(Topic::InstructorCode(id(c)?)),
            ["code", "student", c, u] => Ok(Topic::StudentCode(id(c)?, id(u)?)),
            ["user", u, "system"] => Ok(Topic::UserSystem(id(u)?)),
            _ => Err(err()),
        }
    }
}

/// Send destinations (client → server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    ChatSend(ClassId),
    ChatDelete(ClassId),
    ChatReaction(ClassId),
    ChatTyping(ClassId),
    InstructorCode(ClassId),
    StudentCode(ClassId),
    InstructorEdit(ClassId, UserId),
    ClassMode(ClassId),
    QuizStart(ClassId),
    QuizEnd(ClassId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::ChatSend(c) => write!(f, "chat.send.{}", c),
            Destination::ChatDelete(c) => write!(f, "chat.delete.{}", c),
            Destination::ChatReaction(c) => write!(f, "chat.reaction.{}", c),
            Destination::ChatTyping(c) => write!(f, "chat.typing.{}", c),
            Destination::InstructorCode(c) => write!(f, "code.instructor.{}", c),
            Destination::StudentCode(c) => write!(f, "code.student.{}", c),
            Destination::InstructorEdit(c, s) => write!(f, "code.instructor.edit.{}.{}", c, s),
            Destination::ClassMode(c) => write!(f, "class.mode.{}", c),
            Destination::QuizStart(c) => write!(f, "quiz.start.{}", c),
            Destination::QuizEnd(c) => write!(f, "quiz.end.{}", c),
        }
    }
}

impl FromStr for Destination {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RouteParseError(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();
        let id = |p: &str| p.parse::<i64>().map_err(|_| err());
        match parts.as_slice() {
            ["chat", "send", c] => Ok(Destination::ChatSend(id(c)?)),
            ["chat", "delete", c] => Ok(Destination::ChatDelete(id(c)?)),
            ["chat", "reaction", c] => Ok(Destination::ChatReaction(id(c)?)),
            ["chat", "typing", c] => Ok(Destination::ChatTyping(id(c)?)),
            ["code", "instructor", "edit", c, u] => Ok(Destination::InstructorEdit(id(c)?, id(u)?)),
            ["code", "instructor", c] => Ok(Destination::InstructorCode(id(c)?)),
            ["code", "student", c] => Ok(Destination::StudentCode(id(c)?)),
            ["class", "mode", c] => Ok(Destination::ClassMode(id(c)?)),
            ["quiz", "start", c] => Ok(Destination::QuizStart(id(c)?)),
            ["quiz", "end", c] => Ok(Destination::QuizEnd(id(c)?)),
            _ => Err(err()),
        }
    }
}
