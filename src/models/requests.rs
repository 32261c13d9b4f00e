use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::chat_hub::{ConversationModel, NodeCredentials};

/// Payload for sending a new human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanMessagePayload {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub message: String,
    pub model: ConversationModel,
    #[serde(default)]
    pub credentials: NodeCredentials,
    #[serde(default)]
    pub previous_message_id: Option<Uuid>,
}

/// Payload for editing an existing message.
///
/// `message_id` is the id the new revision gets when a human message is edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub session_id: Uuid,
    pub edit_id: Uuid,
    pub message_id: Uuid,
    pub message: String,
    pub model: ConversationModel,
    #[serde(default)]
    pub credentials: NodeCredentials,
}

/// Payload for regenerating an AI message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateMessagePayload {
    pub session_id: Uuid,
    pub retry_id: Uuid,
    pub model: ConversationModel,
    #[serde(default)]
    pub credentials: NodeCredentials,
}

/// Body of `POST /chat/conversations/{session_id}/messages/{message_id}/edit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub message_id: Uuid,
    pub message: String,
    pub model: ConversationModel,
    #[serde(default)]
    pub credentials: NodeCredentials,
}

/// Body of `POST /chat/conversations/{session_id}/messages/{message_id}/regenerate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateMessageRequest {
    pub model: ConversationModel,
    #[serde(default)]
    pub credentials: NodeCredentials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSessionTitleRequest {
    pub title: String,
}
