pub mod chat_hub;
pub mod execution;
pub mod requests;
pub mod stream;
pub mod users;
pub mod workflow;
