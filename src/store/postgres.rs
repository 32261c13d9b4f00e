use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{ChatHubStore, ChatHubTransaction};
use crate::error::{Error, Result};
use crate::models::chat_hub::{
    ChatHubMessage, ChatHubMessageStatus, ChatHubSession, FinalizeOutcome, NewChatHubMessage,
    NewChatHubSession,
};
use crate::queries::{chat_messages, chat_sessions};
use crate::DbPool;

/// [`ChatHubStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgChatHubStore {
    pool: DbPool,
}

impl PgChatHubStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

struct PgChatHubTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ChatHubTransaction for PgChatHubTransaction {
    async fn get_session(&mut self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>> {
        chat_sessions::get_session(&mut self.tx, session_id, owner_id).await
    }

    async fn create_session(&mut self, new_session: NewChatHubSession) -> Result<ChatHubSession> {
        chat_sessions::create_session(&mut self.tx, new_session).await
    }

    async fn get_message(&mut self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>> {
        chat_messages::get_message(&mut self.tx, session_id, message_id).await
    }

    async fn list_messages(&mut self, session_id: Uuid) -> Result<Vec<ChatHubMessage>> {
        chat_messages::list_messages(&mut self.tx, session_id).await
    }

    async fn insert_message(&mut self, new_message: NewChatHubMessage) -> Result<ChatHubMessage> {
        let session_id = new_message.session_id;
        let message = chat_messages::insert_message(&mut self.tx, new_message).await?;
        chat_sessions::touch_session(&mut self.tx, session_id).await?;
        Ok(message)
    }

    async fn update_message_content(
        &mut self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool> {
        let rows =
            chat_messages::update_message_content(&mut self.tx, session_id, message_id, content).await?;
        Ok(rows > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(Error::Sqlx)
    }
}

#[async_trait]
impl ChatHubStore for PgChatHubStore {
    async fn begin(&self) -> Result<Box<dyn ChatHubTransaction>> {
        let tx = self.pool.begin().await.map_err(Error::Sqlx)?;
        Ok(Box::new(PgChatHubTransaction { tx }))
    }

    async fn get_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>> {
        let mut conn = self.pool.acquire().await?;
        chat_sessions::get_session(&mut conn, session_id, owner_id).await
    }

    async fn list_sessions(&self, owner_id: Uuid) -> Result<Vec<ChatHubSession>> {
        let mut conn = self.pool.acquire().await?;
        chat_sessions::list_sessions(&mut conn, owner_id).await
    }

    async fn update_session_title(&self, session_id: Uuid, owner_id: Uuid, title: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let rows = chat_sessions::update_session_title(&mut conn, session_id, owner_id, title).await?;
        Ok(rows > 0)
    }

    async fn delete_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let rows = chat_sessions::delete_session(&mut conn, session_id, owner_id).await?;
        Ok(rows > 0)
    }

    async fn get_message(&self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>> {
        let mut conn = self.pool.acquire().await?;
        chat_messages::get_message(&mut conn, session_id, message_id).await
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatHubMessage>> {
        let mut conn = self.pool.acquire().await?;
        chat_messages::list_messages(&mut conn, session_id).await
    }

    async fn insert_message(&self, new_message: NewChatHubMessage) -> Result<ChatHubMessage> {
        let mut tx = self.begin().await?;
        let message = tx.insert_message(new_message).await?;
        tx.commit().await?;
        Ok(message)
    }

    async fn update_message_content(&self, session_id: Uuid, message_id: Uuid, content: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let rows = chat_messages::update_message_content(&mut conn, session_id, message_id, content).await?;
        Ok(rows > 0)
    }

    async fn set_message_execution_id(
        &self,
        session_id: Uuid,
        message_ids: &[Uuid],
        execution_id: &str,
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await?;
        chat_messages::set_execution_id(&mut conn, session_id, message_ids, execution_id).await?;
        Ok(())
    }

    async fn finalize_message(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        status: ChatHubMessageStatus,
        content: Option<String>,
    ) -> Result<FinalizeOutcome> {
        let mut conn = self.pool.acquire().await?;

        let updated = chat_messages::finalize_running_message(
            &mut conn,
            session_id,
            message_id,
            status,
            content.as_deref(),
        )
        .await?;
        if updated.is_some() {
            return Ok(FinalizeOutcome::Applied);
        }

        match chat_messages::get_message(&mut conn, session_id, message_id).await? {
            Some(existing) => Ok(FinalizeOutcome::AlreadyTerminal(existing.status)),
            None => Err(Error::NotFound(format!("Message {} not found", message_id))),
        }
    }
}
