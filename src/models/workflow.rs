use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::chat_hub::NodeCredentials;

pub const CHAT_TRIGGER_NODE_TYPE: &str = "@n8n/n8n-nodes-langchain.chatTrigger";
pub const AGENT_NODE_TYPE: &str = "@n8n/n8n-nodes-langchain.agent";
pub const RESPOND_TO_CHAT_NODE_TYPE: &str = "@n8n/n8n-nodes-langchain.chat";
pub const MEMORY_BUFFER_WINDOW_NODE_TYPE: &str = "@n8n/n8n-nodes-langchain.memoryBufferWindow";
pub const MEMORY_MANAGER_NODE_TYPE: &str = "@n8n/n8n-nodes-langchain.memoryManager";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub type_version: f64,
    pub position: [i32; 2],
    pub parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<NodeCredentials>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<Uuid>,
}

/// Kind of edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "main")]
    Main,
    #[serde(rename = "ai_languageModel")]
    AiLanguageModel,
    #[serde(rename = "ai_memory")]
    AiMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub node: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub index: u32,
}

/// Outgoing edges of one node, grouped by connection type then output index.
pub type NodeConnections = IndexMap<ConnectionType, Vec<Vec<Connection>>>;

/// All edges of a workflow keyed by source node name.
pub type Connections = IndexMap<String, NodeConnections>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowData {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Connections,
    pub version_id: Uuid,
    #[serde(default)]
    pub pin_data: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowData {
    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a WorkflowNode> {
        self.nodes.iter().filter(move |node| node.node_type == node_type)
    }
}

/// A workflow that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub active: bool,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Connections,
}

/// Run data handed to the trigger node the execution starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub start_time: i64,
    pub execution_time: i64,
    pub execution_index: u32,
    pub execution_status: String,
    pub data: serde_json::Value,
    pub source: Vec<Option<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerToStartFrom {
    pub name: String,
    pub data: TaskData,
}

impl TriggerToStartFrom {
    /// Builds the chat trigger payload: the session id and the raw message text.
    pub fn chat_message(trigger_name: &str, session_id: Uuid, chat_input: &str) -> Self {
        Self {
            name: trigger_name.to_string(),
            data: TaskData {
                start_time: chrono::Utc::now().timestamp_millis(),
                execution_time: 0,
                execution_index: 0,
                execution_status: "success".to_string(),
                data: serde_json::json!({
                    "main": [[{
                        "json": {
                            "sessionId": session_id,
                            "action": "sendMessage",
                            "chatInput": chat_input,
                        }
                    }]]
                }),
                source: vec![None],
            },
        }
    }

    /// Reads `chatInput` back out of the trigger payload.
    pub fn chat_input(&self) -> Option<&str> {
        self.data
            .data
            .pointer("/main/0/0/json/chatInput")
            .and_then(|v| v.as_str())
    }

    /// Reads `sessionId` back out of the trigger payload.
    pub fn session_id(&self) -> Option<Uuid> {
        self.data
            .data
            .pointer("/main/0/0/json/sessionId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
