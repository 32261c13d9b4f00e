use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{ChatHubStore, ChatHubTransaction};
use crate::error::{Error, Result};
use crate::models::chat_hub::{
    ChatHubMessage, ChatHubMessageStatus, ChatHubSession, FinalizeOutcome, NewChatHubMessage,
    NewChatHubSession,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sessions: IndexMap<Uuid, ChatHubSession>,
    messages: IndexMap<Uuid, ChatHubMessage>,
}

impl MemoryState {
    fn get_session(&self, session_id: Uuid, owner_id: Uuid) -> Option<ChatHubSession> {
        self.sessions
            .get(&session_id)
            .filter(|s| s.owner_id == owner_id)
            .cloned()
    }

    fn create_session(&mut self, new_session: NewChatHubSession) -> Result<ChatHubSession> {
        if self.sessions.contains_key(&new_session.id) {
            return Err(Error::Internal(format!(
                "Session {} already exists",
                new_session.id
            )));
        }
        let now = Utc::now();
        let session = ChatHubSession {
            id: new_session.id,
            owner_id: new_session.owner_id,
            title: new_session.title,
            last_message_at: Some(now),
            credential_id: new_session.model.credential_id,
            provider: new_session.model.provider,
            model: new_session.model.model,
            workflow_id: new_session.model.workflow_id,
            agent_id: new_session.model.agent_id,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    fn get_message(&self, session_id: Uuid, message_id: Uuid) -> Option<ChatHubMessage> {
        self.messages
            .get(&message_id)
            .filter(|m| m.session_id == session_id)
            .cloned()
    }

    fn list_messages(&self, session_id: Uuid) -> Vec<ChatHubMessage> {
        self.messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    fn insert_message(&mut self, new_message: NewChatHubMessage) -> Result<ChatHubMessage> {
        if self.messages.contains_key(&new_message.id) {
            return Err(Error::Internal(format!(
                "Message {} already exists",
                new_message.id
            )));
        }
        let now = Utc::now();
        let session = self
            .sessions
            .get_mut(&new_message.session_id)
            .ok_or_else(|| Error::NotFound(format!("Session {} not found", new_message.session_id)))?;
        session.last_message_at = Some(now);
        session.updated_at = now;

        let message = ChatHubMessage {
            id: new_message.id,
            session_id: new_message.session_id,
            message_type: new_message.message_type,
            name: new_message.name,
            content: new_message.content,
            status: new_message.status,
            provider: new_message.model.provider,
            model: new_message.model.model,
            workflow_id: new_message.model.workflow_id,
            agent_id: new_message.model.agent_id,
            execution_id: new_message.execution_id,
            previous_message_id: new_message.previous_message_id,
            retry_of_message_id: new_message.retry_of_message_id,
            revision_of_message_id: new_message.revision_of_message_id,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn message_mut(&mut self, session_id: Uuid, message_id: Uuid) -> Option<&mut ChatHubMessage> {
        self.messages
            .get_mut(&message_id)
            .filter(|m| m.session_id == session_id)
    }

    fn update_message_content(&mut self, session_id: Uuid, message_id: Uuid, content: &str) -> bool {
        match self.message_mut(session_id, message_id) {
            Some(message) => {
                message.content = content.to_string();
                message.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}

/// In-process [`ChatHubStore`].
///
/// Transactions hold the store lock until they commit or drop, so any other
/// store call made while a transaction is open waits for it.
#[derive(Clone, Default)]
pub struct MemoryChatHubStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChatHubStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryChatHubTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl ChatHubTransaction for MemoryChatHubTransaction {
    async fn get_session(&mut self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>> {
        Ok(self.staged.get_session(session_id, owner_id))
    }

    async fn create_session(&mut self, new_session: NewChatHubSession) -> Result<ChatHubSession> {
        self.staged.create_session(new_session)
    }

    async fn get_message(&mut self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>> {
        Ok(self.staged.get_message(session_id, message_id))
    }

    async fn list_messages(&mut self, session_id: Uuid) -> Result<Vec<ChatHubMessage>> {
        Ok(self.staged.list_messages(session_id))
    }

    async fn insert_message(&mut self, new_message: NewChatHubMessage) -> Result<ChatHubMessage> {
        self.staged.insert_message(new_message)
    }

    async fn update_message_content(
        &mut self,
        session_id: Uuid,
        message_id: Uuid,
        content: &str,
    ) -> Result<bool> {
        Ok(self.staged.update_message_content(session_id, message_id, content))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryChatHubTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl ChatHubStore for MemoryChatHubStore {
    async fn begin(&self) -> Result<Box<dyn ChatHubTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryChatHubTransaction { guard, staged }))
    }

    async fn get_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<Option<ChatHubSession>> {
        Ok(self.state.lock().await.get_session(session_id, owner_id))
    }

    async fn list_sessions(&self, owner_id: Uuid) -> Result<Vec<ChatHubSession>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<ChatHubSession> = state
            .sessions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(sessions)
    }

    async fn update_session_title(&self, session_id: Uuid, owner_id: Uuid, title: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session_id).filter(|s| s.owner_id == owner_id) {
            Some(session) => {
                session.title = title.to_string();
                session.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_session(&self, session_id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.get_session(session_id, owner_id).is_none() {
            return Ok(false);
        }
        state.sessions.shift_remove(&session_id);
        state.messages.retain(|_, m| m.session_id != session_id);
        Ok(true)
    }

    async fn get_message(&self, session_id: Uuid, message_id: Uuid) -> Result<Option<ChatHubMessage>> {
        Ok(self.state.lock().await.get_message(session_id, message_id))
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatHubMessage>> {
        Ok(self.state.lock().await.list_messages(session_id))
    }

    async fn insert_message(&self, new_message: NewChatHubMessage) -> Result<ChatHubMessage> {
        self.state.lock().await.insert_message(new_message)
    }

    async fn update_message_content(&self, session_id: Uuid, message_id: Uuid, content: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .update_message_content(session_id, message_id, content))
    }

    async fn set_message_execution_id(
        &self,
        session_id: Uuid,
        message_ids: &[Uuid],
        execution_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for id in message_ids {
            if let Some(message) = state.message_mut(session_id, *id) {
                if message.execution_id.is_none() {
                    message.execution_id = Some(execution_id.to_string());
                    message.updated_at = Utc::now();
                }
            }
        }
        Ok(())
    }

    async fn finalize_message(
        &self,
        session_id: Uuid,
        message_id: Uuid,
        status: ChatHubMessageStatus,
        content: Option<String>,
    ) -> Result<FinalizeOutcome> {
        let mut state = self.state.lock().await;
        let message = state
            .message_mut(session_id, message_id)
            .ok_or_else(|| Error::NotFound(format!("Message {} not found", message_id)))?;

        if message.status.is_terminal() {
            return Ok(FinalizeOutcome::AlreadyTerminal(message.status));
        }

        message.status = status;
        if let Some(content) = content {
            message.content = content;
        }
        message.updated_at = Utc::now();
        Ok(FinalizeOutcome::Applied)
    }
}
