use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Display name stored on assistant messages.
pub const AI_MESSAGE_NAME: &str = "AI";

/// Fallback display name for human messages when the user has no first name.
pub const DEFAULT_HUMAN_NAME: &str = "User";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatHubMessageType {
    Human,
    Ai,
    System,
}

/// Lifecycle status of a chat message.
///
/// `Running` is the only non-terminal status. A message leaves it exactly once.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatHubMessageStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl ChatHubMessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Provider column value. `N8n` selects a user-owned workflow, `CustomAgent` a stored agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ChatHubProvider {
    Openai,
    Anthropic,
    Google,
    N8n,
    CustomAgent,
}

/// The subset of providers that are backed by a language model node.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LlmProvider {
    Openai,
    Anthropic,
    Google,
}

impl From<LlmProvider> for ChatHubProvider {
    fn from(provider: LlmProvider) -> Self {
        match provider {
            LlmProvider::Openai => ChatHubProvider::Openai,
            LlmProvider::Anthropic => ChatHubProvider::Anthropic,
            LlmProvider::Google => ChatHubProvider::Google,
        }
    }
}

/// Model selection for a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum ConversationModel {
    Openai {
        model: String,
    },
    Anthropic {
        model: String,
    },
    Google {
        model: String,
    },
    #[serde(rename_all = "camelCase")]
    N8n {
        workflow_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CustomAgent {
        agent_id: Uuid,
    },
}

impl ConversationModel {
    pub fn provider(&self) -> ChatHubProvider {
        match self {
            Self::Openai { .. } => ChatHubProvider::Openai,
            Self::Anthropic { .. } => ChatHubProvider::Anthropic,
            Self::Google { .. } => ChatHubProvider::Google,
            Self::N8n { .. } => ChatHubProvider::N8n,
            Self::CustomAgent { .. } => ChatHubProvider::CustomAgent,
        }
    }

    /// Returns the LLM provider and model name, if this selection is a plain model.
    pub fn llm(&self) -> Option<(LlmProvider, &str)> {
        match self {
            Self::Openai { model } => Some((LlmProvider::Openai, model)),
            Self::Anthropic { model } => Some((LlmProvider::Anthropic, model)),
            Self::Google { model } => Some((LlmProvider::Google, model)),
            Self::N8n { .. } | Self::CustomAgent { .. } => None,
        }
    }
}

/// A credential reference as sent by the client: `{ id, name }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCredential {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Credentials keyed by credential type, e.g. `openAiApi`.
pub type NodeCredentials = IndexMap<String, NodeCredential>;

/// A model selection together with the credential picked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedModel {
    pub model: ConversationModel,
    pub credential_id: Option<String>,
}

/// The flattened columns a model selection is stored as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelColumns {
    pub provider: Option<ChatHubProvider>,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub credential_id: Option<String>,
}

impl SelectedModel {
    pub fn columns(&self) -> ModelColumns {
        let mut columns = ModelColumns {
            provider: Some(self.model.provider()),
            credential_id: self.credential_id.clone(),
            ..Default::default()
        };
        match &self.model {
            ConversationModel::Openai { model }
            | ConversationModel::Anthropic { model }
            | ConversationModel::Google { model } => columns.model = Some(model.clone()),
            ConversationModel::N8n { workflow_id } => {
                columns.workflow_id = Some(workflow_id.clone())
            }
            ConversationModel::CustomAgent { agent_id } => columns.agent_id = Some(*agent_id),
        }
        columns
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatHubSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub credential_id: Option<String>,
    pub provider: Option<ChatHubProvider>,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatHubSession {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub model: ModelColumns,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatHubMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    #[sqlx(rename = "type")]
    pub message_type: ChatHubMessageType,
    pub name: String,
    pub content: String,
    pub status: ChatHubMessageStatus,
    pub provider: Option<ChatHubProvider>,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub execution_id: Option<String>,
    pub previous_message_id: Option<Uuid>,
    pub retry_of_message_id: Option<Uuid>,
    pub revision_of_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatHubMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_type: ChatHubMessageType,
    pub name: String,
    pub content: String,
    pub status: ChatHubMessageStatus,
    pub model: ModelColumns,
    pub execution_id: Option<String>,
    pub previous_message_id: Option<Uuid>,
    pub retry_of_message_id: Option<Uuid>,
    pub revision_of_message_id: Option<Uuid>,
}

/// Result of a terminal-status compare-and-swap on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The message was running and now carries the requested status.
    Applied,
    /// The message had already left `running`; nothing was changed.
    AlreadyTerminal(ChatHubMessageStatus),
}

// ============================================================================
// API RESPONSES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHubSessionDto {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub credential_id: Option<String>,
    pub provider: Option<ChatHubProvider>,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ChatHubSession> for ChatHubSessionDto {
    fn from(session: ChatHubSession) -> Self {
        Self {
            id: session.id,
            title: session.title,
            owner_id: session.owner_id,
            last_message_at: session.last_message_at,
            credential_id: session.credential_id,
            provider: session.provider,
            model: session.model,
            workflow_id: session.workflow_id,
            agent_id: session.agent_id,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHubMessageDto {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: ChatHubMessageType,
    pub name: String,
    pub content: String,
    pub provider: Option<ChatHubProvider>,
    pub model: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub execution_id: Option<String>,
    pub status: ChatHubMessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub previous_message_id: Option<Uuid>,
    pub retry_of_message_id: Option<Uuid>,
    pub revision_of_message_id: Option<Uuid>,
}

impl From<ChatHubMessage> for ChatHubMessageDto {
    fn from(message: ChatHubMessage) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            message_type: message.message_type,
            name: message.name,
            content: message.content,
            provider: message.provider,
            model: message.model,
            workflow_id: message.workflow_id,
            agent_id: message.agent_id,
            execution_id: message.execution_id,
            status: message.status,
            created_at: message.created_at,
            updated_at: message.updated_at,
            previous_message_id: message.previous_message_id,
            retry_of_message_id: message.retry_of_message_id,
            revision_of_message_id: message.revision_of_message_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHubConversation {
    pub messages: IndexMap<Uuid, ChatHubMessageDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHubConversationResponse {
    pub session: ChatHubSessionDto,
    pub conversation: ChatHubConversation,
}
