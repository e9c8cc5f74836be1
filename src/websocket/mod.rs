pub mod handler;
pub mod msg_ping_handler;
pub mod msg_send_handler;
pub mod msg_subscribe_handler;
