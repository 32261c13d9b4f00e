pub mod chat_messages;
pub mod chat_sessions;
