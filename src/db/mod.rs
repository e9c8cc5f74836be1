pub mod chat_archive;
