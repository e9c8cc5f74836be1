pub mod auth_service;
pub mod chat_service;
pub mod class_admin;
pub mod code_service;
pub mod participant_directory;
pub mod session_registry;
