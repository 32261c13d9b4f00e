use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic kind of an engine output fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Begin,
    Item,
    End,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub run_index: u32,
    #[serde(default)]
    pub item_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_message_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of_message_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One line of structured engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identity of the logical message a chunk belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub node_id: String,
    pub run_index: u32,
}

impl StructuredChunk {
    pub fn node_identity(&self) -> Option<NodeIdentity> {
        self.metadata.node_id.as_ref().map(|node_id| NodeIdentity {
            node_id: node_id.clone(),
            run_index: self.metadata.run_index,
        })
    }

    /// Stamps the message linkage onto the chunk's metadata.
    pub fn enrich(&mut self, linkage: &MessageLinkage) {
        self.metadata.message_id = Some(linkage.id);
        self.metadata.previous_message_id = linkage.previous_message_id;
        self.metadata.retry_of_message_id = linkage.retry_of_message_id;
    }
}

/// Ids the aggregator assigned to the message a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLinkage {
    pub id: Uuid,
    pub previous_message_id: Option<Uuid>,
    pub retry_of_message_id: Option<Uuid>,
}
