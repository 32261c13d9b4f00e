pub mod agents;
pub mod chat_hub;
pub mod credentials;
pub mod workflows;
