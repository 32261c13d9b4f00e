//! Reassembles streamed engine chunks into chat messages.
//!
//! A message is identified by the node that produced it and the node's run
//! index. The first chunk seen for an identity opens its message, whatever its
//! kind. Each identity moves through `begin -> item* -> (end | error)` once;
//! anything arriving after it is finalized is acknowledged but not acted on.

use indexmap::IndexMap;
use uuid::Uuid;

use crate::models::chat_hub::ChatHubMessageStatus;
use crate::models::stream::{ChunkKind, MessageLinkage, NodeIdentity, StructuredChunk};

/// Accumulated state of one streamed message.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMessage {
    pub id: Uuid,
    pub previous_message_id: Option<Uuid>,
    pub retry_of_message_id: Option<Uuid>,
    pub content: String,
    pub status: ChatHubMessageStatus,
}

impl AggregatedMessage {
    pub fn linkage(&self) -> MessageLinkage {
        MessageLinkage {
            id: self.id,
            previous_message_id: self.previous_message_id,
            retry_of_message_id: self.retry_of_message_id,
        }
    }

    fn is_open(&self) -> bool {
        self.status == ChatHubMessageStatus::Running
    }
}

/// Receives message lifecycle events. Callbacks must not block.
pub trait AggregatorHandler: Send {
    fn on_begin(&mut self, message: &AggregatedMessage);

    fn on_item(&mut self, message: &AggregatedMessage, chunk: &str);

    /// Called once per message with status `success` or `cancelled`.
    fn on_end(&mut self, message: &AggregatedMessage);

    fn on_error(&mut self, message: &AggregatedMessage, error: &str);
}

pub struct ChunkAggregator {
    previous_message_id: Option<Uuid>,
    retry_of_message_id: Option<Uuid>,
    ignored_node_names: Vec<String>,
    handler: Box<dyn AggregatorHandler>,
    messages: IndexMap<NodeIdentity, AggregatedMessage>,
    last_opened: Option<Uuid>,
}

impl ChunkAggregator {
    /// `previous_message_id` is the message the first streamed message replies to.
    pub fn new(
        previous_message_id: Option<Uuid>,
        retry_of_message_id: Option<Uuid>,
        handler: Box<dyn AggregatorHandler>,
    ) -> Self {
        Self {
            previous_message_id,
            retry_of_message_id,
            ignored_node_names: Vec::new(),
            handler,
            messages: IndexMap::new(),
            last_opened: None,
        }
    }

    /// Drops every chunk emitted by a node with this name.
    pub fn ignore_node(mut self, node_name: impl Into<String>) -> Self {
        self.ignored_node_names.push(node_name.into());
        self
    }

    pub fn ingest(&mut self, chunk: &StructuredChunk) -> Option<MessageLinkage> {
        if let Some(name) = chunk.metadata.node_name.as_deref() {
            if self.ignored_node_names.iter().any(|ignored| ignored == name) {
                return None;
            }
        }

        let identity = chunk.node_identity()?;
        if !self.messages.contains_key(&identity) {
            self.begin(identity.clone());
        }

        let message = self.messages.get_mut(&identity)?;
        if !message.is_open() {
            return Some(message.linkage());
        }

        match chunk.kind {
            ChunkKind::Begin => {}
            ChunkKind::Item => {
                let text = chunk.content.as_deref().unwrap_or_default();
                message.content.push_str(text);
                self.handler.on_item(message, text);
            }
            ChunkKind::End => {
                message.status = ChatHubMessageStatus::Success;
                self.handler.on_end(message);
            }
            ChunkKind::Error => {
                message.status = ChatHubMessageStatus::Error;
                let error = chunk.content.as_deref().unwrap_or_default();
                self.handler.on_error(message, error);
            }
        }
        Some(message.linkage())
    }

    fn begin(&mut self, identity: NodeIdentity) {
        let message = AggregatedMessage {
            id: Uuid::now_v7(),
            previous_message_id: self.last_opened.or(self.previous_message_id),
            retry_of_message_id: self.retry_of_message_id,
            content: String::new(),
            status: ChatHubMessageStatus::Running,
        };
        self.last_opened = Some(message.id);
        self.handler.on_begin(&message);
        self.messages.insert(identity, message);
    }

    /// Marks every open message cancelled. Safe to call more than once.
    pub fn finalize_all(&mut self) {
        for message in self.messages.values_mut() {
            if message.is_open() {
                message.status = ChatHubMessageStatus::Cancelled;
                self.handler.on_end(message);
            }
        }
    }

    /// Ids of all messages opened so far, in the order they were opened.
    pub fn message_ids(&self) -> Vec<Uuid> {
        self.messages.values().map(|m| m.id).collect()
    }
}

/// Feeds each JSON line of `text` to the aggregator and stamps message ids onto it.
///
/// Lines that are not chunks, or that the aggregator does not track, pass
/// through verbatim. Line endings are preserved.
pub fn enrich_lines(aggregator: &mut ChunkAggregator, text: &str) -> Result<String, serde_json::Error> {
    let mut output = String::with_capacity(text.len() + 128);

    for segment in text.split_inclusive('\n') {
        let line = segment.trim_end_matches(['\r', '\n']);
        let ending = &segment[line.len()..];

        let trimmed = line.trim();
        if trimmed.is_empty() {
            output.push_str(segment);
            continue;
        }

        let Ok(mut chunk) = serde_json::from_str::<StructuredChunk>(trimmed) else {
            output.push_str(segment);
            continue;
        };

        match aggregator.ingest(&chunk) {
            Some(linkage) => {
                chunk.enrich(&linkage);
                output.push_str(&serde_json::to_string(&chunk)?);
                output.push_str(if ending.is_empty() { "\n" } else { ending });
            }
            None => output.push_str(segment),
        }
    }

    Ok(output)
}
