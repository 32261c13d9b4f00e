use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::chat_hub::LlmProvider;

/// A user-defined chat agent: a system prompt bound to a model and credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAgent {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: Option<String>,
    pub provider: LlmProvider,
    pub model: String,
    pub credential_id: Option<String>,
}

#[async_trait]
pub trait ChatAgentRepository: Send + Sync {
    async fn find_for_user(&self, agent_id: Uuid, user_id: Uuid) -> Result<Option<ChatAgent>>;
}
