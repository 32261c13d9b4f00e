//! Persistence boundary for chat sessions and messages.
//!
//! Preparation-phase writes go through a [`ChatHubTransaction`]; everything the
//! streaming writer does afterwards is a single-statement operation on the store.

mod memory;
mod postgres;

pub use memory::MemoryChatHubStore;
pub use postgres::PgChatHubStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::chat_hub::{
    ChatHubMessage, ChatHubMessageStatus, ChatHubSession, FinalizeOutcome, NewChatHubMessage,
    NewChatHubSession,
};

/// Operations that run inside one atomic scope.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls it back.
#[async_trait]
pub trait ChatHubTransaction: Send {
    async fn get_session(&mut self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>>;

    async fn create_session(&mut self, new_session: NewChatHubSession) -> Result<ChatHubSession>;

    async fn get_message(&mut self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>>;

    async fn list_messages(&mut self, session_id: Uuid) -> Result<Vec<ChatHubMessage>>;

    /// Inserts a message and bumps the session's `last_message_at`.
    async fn insert_message(&mut self, new_message: NewChatHubMessage) -> Result<ChatHubMessage>;

    /// Returns false when no such message exists.
    async fn update_message_content(
        &mut self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait ChatHubStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ChatHubTransaction>>;

    async fn get_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>>;

    async fn list_sessions(&self, owner_id: Uuid) -> Result<Vec<ChatHubSession>>;

    /// Returns false when the session does not exist for this owner.
    async fn update_session_title(&self, session_id: Uuid, owner_id: Uuid, title: &str) -> Result<bool>;

    /// Deletes the session and its messages. Returns false when it does not exist for this owner.
    async fn delete_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<bool>;

    async fn get_message(&self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>>;

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatHubMessage>>;

    /// Inserts a message and bumps the session's `last_message_at`.
    async fn insert_message(&self, new_message: NewChatHubMessage) -> Result<ChatHubMessage>;

    async fn update_message_content(&self, session_id: Uuid, message_id: Uuid, content: &str) -> Result<bool>;

    /// Sets `execution_id` on those of `message_ids` that have none.
    async fn set_message_execution_id(
        &self,
        session_id: Uuid,
        message_ids: &[Uuid],
        execution_id: &str,
    ) -> Result<()>;

    /// Compare-and-swap from `running` to a terminal `status`.
    ///
    /// `content`, when given, replaces the message content in the same write.
    /// Fails with `NotFound` when the message does not exist.
    async fn finalize_message(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        status: ChatHubMessageStatus,
        content: Option<String>,
    ) -> Result<FinalizeOutcome>;
}
